//! 体验生成器抽象
//!
//! 实际的内容/体验生成逻辑是外部协作方，这里只定义边界：
//! generate_experience（初始体验）与 generate_adaptation（适配方案）。
//! 生成器不可用时调用方必须优雅降级（重试 + fallback），不允许卡死周期。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::coordinator::SubjectProfile;
use crate::error::MentorError;

/// 一份可呈现的体验内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub title: String,
    /// 呈现形式（visual / interactive / narrative…），由生成器决定
    pub modality: String,
    /// 难度档位 0.0-1.0
    pub difficulty: f64,
    /// 生成器自定义的内容载荷
    pub content: serde_json::Value,
    /// 生成器不可用时由编排器本地合成的降级体验
    pub fallback_generated: bool,
}

impl Experience {
    pub fn new(title: impl Into<String>, modality: impl Into<String>, difficulty: f64) -> Self {
        Self {
            id: format!("exp_{}", uuid::Uuid::new_v4()),
            title: title.into(),
            modality: modality.into(),
            difficulty: difficulty.clamp(0.0, 1.0),
            content: serde_json::Value::Null,
            fallback_generated: false,
        }
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }
}

/// 适配方案：生成器针对触发原因给出的新体验与置信度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationPlan {
    /// 采用的适配策略（simplify / gamify / change_modality…）
    pub strategy: String,
    /// 生成器对该方案的置信度 0.0-1.0
    pub confidence: f64,
    pub new_experience: Experience,
}

/// 体验生成器 trait：初始生成与按需适配
#[async_trait]
pub trait ExperienceGenerator: Send + Sync {
    /// 根据目标与画像生成初始体验
    async fn generate_experience(
        &self,
        objective: &str,
        profile: &SubjectProfile,
        context: &serde_json::Value,
    ) -> Result<Experience, MentorError>;

    /// 针对当前体验与触发原因生成适配方案
    async fn generate_adaptation(
        &self,
        current: &Experience,
        profile: &SubjectProfile,
        reason: &str,
        engagement_score: f64,
    ) -> Result<AdaptationPlan, MentorError>;
}

/// 生成器不可用时本地合成的保底体验
pub fn synth_default_experience(objective: &str) -> Experience {
    let mut exp = Experience::new(
        format!("Introduction: {}", objective),
        "interactive",
        0.3,
    );
    exp.fallback_generated = true;
    exp.content = serde_json::json!({
        "objective": objective,
        "note": "locally synthesized default experience",
    });
    exp
}

/// Mock 生成器（用于测试，无需外部服务）
///
/// 确定性输出：标题回显 objective，适配策略按投入度二选一。
#[derive(Debug, Default)]
pub struct MockGenerator;

#[async_trait]
impl ExperienceGenerator for MockGenerator {
    async fn generate_experience(
        &self,
        objective: &str,
        profile: &SubjectProfile,
        _context: &serde_json::Value,
    ) -> Result<Experience, MentorError> {
        let difficulty = (profile.engagement.score * 0.5 + 0.25).clamp(0.0, 1.0);
        Ok(
            Experience::new(format!("Mock: {}", objective), "interactive", difficulty)
                .with_content(serde_json::json!({ "objective": objective })),
        )
    }

    async fn generate_adaptation(
        &self,
        current: &Experience,
        _profile: &SubjectProfile,
        reason: &str,
        engagement_score: f64,
    ) -> Result<AdaptationPlan, MentorError> {
        let strategy = if engagement_score < 0.5 {
            "simplify"
        } else {
            "advance"
        };
        let new_difficulty = if engagement_score < 0.5 {
            (current.difficulty - 0.1).max(0.0)
        } else {
            (current.difficulty + 0.1).min(1.0)
        };

        Ok(AdaptationPlan {
            strategy: strategy.to_string(),
            confidence: 0.8,
            new_experience: Experience::new(
                format!("{} (adapted: {})", current.title, reason),
                current.modality.clone(),
                new_difficulty,
            ),
        })
    }
}
