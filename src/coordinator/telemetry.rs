//! 遥测载荷定义与校验
//!
//! 五类行为信号：engagement / trust / interaction / progress /
//! adaptation_outcome。校验失败返回结构化错误，画像不做任何改动。
//! trust 事件类型是封闭枚举，未知字符串在反序列化边界即被拒绝。

use serde::{Deserialize, Serialize};

use crate::error::MentorError;

/// 信任事件类型（固定 5 值枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    VoluntaryInteraction,
    HelpRequest,
    MistakeAcknowledgment,
    PreferenceExpression,
    CreativeSharing,
}

impl std::fmt::Display for TrustEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustEventType::VoluntaryInteraction => write!(f, "voluntary_interaction"),
            TrustEventType::HelpRequest => write!(f, "help_request"),
            TrustEventType::MistakeAcknowledgment => write!(f, "mistake_acknowledgment"),
            TrustEventType::PreferenceExpression => write!(f, "preference_expression"),
            TrustEventType::CreativeSharing => write!(f, "creative_sharing"),
        }
    }
}

/// 投入度上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementUpdate {
    pub subject_id: String,
    pub session_id: String,
    /// 0.0-1.0
    pub score: f64,
    pub interaction_count: u64,
    pub time_on_task_secs: u64,
}

/// 信任事件上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustUpdate {
    pub subject_id: String,
    pub session_id: String,
    pub event: TrustEventType,
    pub context: Option<String>,
}

/// 单次交互上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionUpdate {
    pub subject_id: String,
    pub session_id: String,
    pub kind: String,
    pub duration_ms: u64,
    /// 附加细节；超过一个字段视为 rich detail
    pub details: Option<serde_json::Value>,
    /// 是否发生在教学语境中
    #[serde(default)]
    pub educational_context: bool,
}

/// 概念掌握进度上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub subject_id: String,
    pub session_id: String,
    pub concept: String,
    /// 0.0-1.0
    pub success_rate: f64,
    pub attempts: u32,
    pub time_spent_secs: u64,
}

/// 适配效果回报（某次适配之后投入度的变化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationOutcomeUpdate {
    pub subject_id: String,
    pub session_id: String,
    pub adaptation_id: String,
    pub accepted: bool,
    pub engagement_delta: f64,
}

/// 遥测更新的统一包装（按 data_type 打标签）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "snake_case")]
pub enum TelemetryUpdate {
    Engagement(EngagementUpdate),
    Trust(TrustUpdate),
    Interaction(InteractionUpdate),
    Progress(ProgressUpdate),
    AdaptationOutcome(AdaptationOutcomeUpdate),
}

impl TelemetryUpdate {
    pub fn data_type(&self) -> &'static str {
        match self {
            TelemetryUpdate::Engagement(_) => "engagement",
            TelemetryUpdate::Trust(_) => "trust",
            TelemetryUpdate::Interaction(_) => "interaction",
            TelemetryUpdate::Progress(_) => "progress",
            TelemetryUpdate::AdaptationOutcome(_) => "adaptation_outcome",
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            TelemetryUpdate::Engagement(u) => &u.subject_id,
            TelemetryUpdate::Trust(u) => &u.subject_id,
            TelemetryUpdate::Interaction(u) => &u.subject_id,
            TelemetryUpdate::Progress(u) => &u.subject_id,
            TelemetryUpdate::AdaptationOutcome(u) => &u.subject_id,
        }
    }

    /// 类型相关的字段与范围检查；失败时不产生任何画像变更
    pub fn validate(&self) -> Result<(), MentorError> {
        if self.subject_id().is_empty() {
            return Err(MentorError::validation("subject_id", "must not be empty"));
        }

        match self {
            TelemetryUpdate::Engagement(u) => {
                if !(0.0..=1.0).contains(&u.score) {
                    return Err(MentorError::validation(
                        "score",
                        format!("must be within [0,1], got {}", u.score),
                    ));
                }
            }
            TelemetryUpdate::Trust(u) => {
                if u.session_id.is_empty() {
                    return Err(MentorError::validation("session_id", "must not be empty"));
                }
            }
            TelemetryUpdate::Interaction(u) => {
                if u.kind.is_empty() {
                    return Err(MentorError::validation("kind", "must not be empty"));
                }
            }
            TelemetryUpdate::Progress(u) => {
                if !(0.0..=1.0).contains(&u.success_rate) {
                    return Err(MentorError::validation(
                        "success_rate",
                        format!("must be within [0,1], got {}", u.success_rate),
                    ));
                }
                if u.attempts == 0 {
                    return Err(MentorError::validation("attempts", "must be at least 1"));
                }
                if u.concept.is_empty() {
                    return Err(MentorError::validation("concept", "must not be empty"));
                }
            }
            TelemetryUpdate::AdaptationOutcome(u) => {
                if u.adaptation_id.is_empty() {
                    return Err(MentorError::validation(
                        "adaptation_id",
                        "must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engagement(score: f64) -> TelemetryUpdate {
        TelemetryUpdate::Engagement(EngagementUpdate {
            subject_id: "subject_1".into(),
            session_id: "session_1".into(),
            score,
            interaction_count: 3,
            time_on_task_secs: 120,
        })
    }

    #[test]
    fn test_engagement_score_range() {
        assert!(engagement(0.0).validate().is_ok());
        assert!(engagement(1.0).validate().is_ok());
        assert!(engagement(1.3).validate().is_err());
        assert!(engagement(-0.1).validate().is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let update = TelemetryUpdate::Engagement(EngagementUpdate {
            subject_id: "".into(),
            session_id: "session_1".into(),
            score: 0.5,
            interaction_count: 0,
            time_on_task_secs: 0,
        });
        let err = update.validate().unwrap_err();
        assert!(matches!(err, MentorError::Validation { .. }));
    }

    #[test]
    fn test_unknown_trust_event_rejected_at_deserialize() {
        let raw = serde_json::json!({
            "data_type": "trust",
            "subject_id": "subject_1",
            "session_id": "session_1",
            "event": "bribery",
            "context": null,
        });
        assert!(serde_json::from_value::<TelemetryUpdate>(raw).is_err());
    }

    #[test]
    fn test_progress_requires_attempts() {
        let update = TelemetryUpdate::Progress(ProgressUpdate {
            subject_id: "subject_1".into(),
            session_id: "session_1".into(),
            concept: "fractions".into(),
            success_rate: 0.5,
            attempts: 0,
            time_spent_secs: 60,
        });
        assert!(update.validate().is_err());
    }
}
