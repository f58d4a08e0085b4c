//! 适配候选评估与选取
//!
//! 每个编排周期先从画像与会话状态评估候选，再按优先级选出一个执行。
//! 选取必须稳定：同优先级取先检出者，不引入随机性。

use crate::config::{HeuristicsSection, OrchestratorSection};
use crate::coordinator::SubjectProfile;
use crate::session::{Priority, Session};

/// 一个待执行的适配候选
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationCandidate {
    /// 适配类别（engagement_intervention / trust_repair / progress_shift / advancement / manual）
    pub kind: String,
    /// 具体触发原因，透传给生成器与适配记录
    pub trigger: String,
    pub priority: Priority,
}

impl AdaptationCandidate {
    pub fn new(kind: &str, trigger: &str, priority: Priority) -> Self {
        Self {
            kind: kind.to_string(),
            trigger: trigger.to_string(),
            priority,
        }
    }
}

/// 从画像与会话状态评估全部候选（检出顺序即入列顺序）
pub fn assess_candidates(
    profile: &SubjectProfile,
    session: &Session,
    heuristics: &HeuristicsSection,
    orchestrator: &OrchestratorSection,
) -> Vec<AdaptationCandidate> {
    let mut candidates = Vec::new();

    let score = profile.engagement.score;
    if score < heuristics.low_engagement_threshold {
        // 连续 3 个低样本或跌破 0.25 直接升为 high
        let consecutive_lows = profile
            .engagement
            .history
            .iter()
            .rev()
            .take(3)
            .filter(|s| s.score < heuristics.low_engagement_threshold)
            .count();
        let priority = if score < 0.25 || consecutive_lows >= 3 {
            Priority::High
        } else {
            severity_priority(1.0 - score)
        };
        candidates.push(AdaptationCandidate::new(
            "engagement_intervention",
            "engagement_drop",
            priority,
        ));
    }

    let trust = profile.trust.level;
    if trust < heuristics.trust_stage_thresholds[0] {
        let priority = if trust < heuristics.trust_stage_thresholds[0] / 2.0 {
            Priority::High
        } else {
            Priority::Medium
        };
        candidates.push(AdaptationCandidate::new(
            "trust_repair",
            "trust_decline",
            priority,
        ));
    }

    if is_stuck(session) {
        candidates.push(AdaptationCandidate::new(
            "progress_shift",
            "stuck_on_concept",
            Priority::Medium,
        ));
    }

    // 投入度良好且长时间未适配：可推进难度
    if candidates.is_empty()
        && score >= heuristics.engagement_medium
        && since_last_adaptation(session) >= orchestrator.advancement_elapsed()
    {
        candidates.push(AdaptationCandidate::new(
            "advancement",
            "advancement_opportunity",
            Priority::Low,
        ));
    }

    candidates
}

/// 严格 high > medium > low；同优先级取先检出者
pub fn select_primary(candidates: &[AdaptationCandidate]) -> Option<&AdaptationCandidate> {
    let mut best: Option<&AdaptationCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.priority <= current.priority => {}
            _ => best = Some(candidate),
        }
    }
    best
}

fn severity_priority(severity: f64) -> Priority {
    if severity >= 0.85 {
        Priority::High
    } else if severity >= 0.6 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// 最近 3 次适配中有 ≥2 次同触发：疑似卡在同一概念
fn is_stuck(session: &Session) -> bool {
    let recent: Vec<&str> = session
        .adaptation_history
        .iter()
        .rev()
        .take(3)
        .map(|a| a.trigger.as_str())
        .collect();
    if recent.len() < 2 {
        return false;
    }
    recent
        .iter()
        .any(|t| recent.iter().filter(|o| *o == t).count() >= 2)
}

fn since_last_adaptation(session: &Session) -> std::time::Duration {
    match session.adaptation_history.last() {
        // 适配记录只有墙钟时间戳，这里用会话单调时长减去记录时刻的偏移近似
        Some(last) => {
            let offset_ms = (last.timestamp_ms - session.started_at_ms).max(0) as u64;
            session
                .elapsed()
                .saturating_sub(std::time::Duration::from_millis(offset_ms))
        }
        None => session.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::EngagementSample;
    use crate::generator::Experience;
    use crate::session::{AdaptationRecord, SessionConstraints};
    use std::time::Duration;

    fn test_session() -> Session {
        Session::new(
            "subject_1",
            "fractions",
            Duration::from_secs(1800),
            SessionConstraints::default(),
            Experience::new("Fractions", "visual", 0.5),
        )
    }

    fn low_engagement_profile(score: f64, consecutive_lows: usize) -> SubjectProfile {
        let mut profile = SubjectProfile::new("subject_1");
        profile.engagement.score = score;
        for i in 0..consecutive_lows {
            profile.push_engagement_sample(EngagementSample {
                score,
                timestamp_ms: i as i64,
            });
        }
        profile
    }

    #[test]
    fn test_three_consecutive_lows_escalate_to_high() {
        let profile = low_engagement_profile(0.25, 3);
        let session = test_session();
        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );

        let selected = select_primary(&candidates).unwrap();
        assert_eq!(selected.trigger, "engagement_drop");
        assert_eq!(selected.priority, Priority::High);
    }

    #[test]
    fn test_single_mild_low_stays_below_high() {
        let profile = low_engagement_profile(0.28, 1);
        let session = test_session();
        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );

        assert_eq!(candidates.len(), 1);
        assert_ne!(candidates[0].priority, Priority::High);
    }

    #[test]
    fn test_low_trust_yields_trust_repair() {
        let mut profile = SubjectProfile::new("subject_1");
        profile.engagement.score = 0.5;
        profile.trust.level = 0.15;
        let session = test_session();

        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, "trust_repair");
        assert_eq!(candidates[0].trigger, "trust_decline");
        assert_eq!(candidates[0].priority, Priority::Medium);
    }

    #[test]
    fn test_collapsed_trust_escalates_to_high() {
        let mut profile = SubjectProfile::new("subject_1");
        profile.engagement.score = 0.5;
        // 低于首档阈值的一半
        profile.trust.level = 0.05;
        let session = test_session();

        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );
        let selected = select_primary(&candidates).unwrap();
        assert_eq!(selected.trigger, "trust_decline");
        assert_eq!(selected.priority, Priority::High);
    }

    #[test]
    fn test_stuck_on_repeated_trigger() {
        let mut session = test_session();
        for _ in 0..2 {
            session.adaptation_history.push(AdaptationRecord::new(
                "engagement_drop",
                "engagement_intervention",
                Priority::Medium,
                "exp_a",
                "exp_b",
                "simplify",
                0.8,
            ));
        }
        let mut profile = SubjectProfile::new("subject_1");
        profile.engagement.score = 0.5;

        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );
        assert!(candidates.iter().any(|c| c.trigger == "stuck_on_concept"));
    }

    #[test]
    fn test_selection_is_stable_on_ties() {
        let candidates = vec![
            AdaptationCandidate::new("a", "first_medium", Priority::Medium),
            AdaptationCandidate::new("b", "second_medium", Priority::Medium),
            AdaptationCandidate::new("c", "low", Priority::Low),
        ];
        assert_eq!(select_primary(&candidates).unwrap().trigger, "first_medium");
    }

    #[test]
    fn test_high_beats_earlier_medium() {
        let candidates = vec![
            AdaptationCandidate::new("a", "medium", Priority::Medium),
            AdaptationCandidate::new("b", "high", Priority::High),
        ];
        assert_eq!(select_primary(&candidates).unwrap().trigger, "high");
    }

    #[test]
    fn test_healthy_profile_yields_no_candidates_early() {
        let mut profile = SubjectProfile::new("subject_1");
        profile.engagement.score = 0.7;
        profile.trust.level = 0.5;
        let session = test_session();

        // 会话刚开始，未到推进窗口
        let candidates = assess_candidates(
            &profile,
            &session,
            &HeuristicsSection::default(),
            &OrchestratorSection::default(),
        );
        assert!(candidates.is_empty());
    }
}
