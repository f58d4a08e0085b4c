//! 结果分档与总结生成
//!
//! 结果档位由 (结束原因, 最终投入度, 适配次数) 的确定性决策树给出；
//! 洞察与建议是面向人的文本，供后续会话参考。

use super::types::{EndReason, Session, SessionOutcome, SessionSummary};

/// 结果分档决策树
///
/// 目标达成 + 高投入 ⇒ excellent；目标达成 ⇒ good；
/// 适配频繁 ⇒ challenging；持续低投入 ⇒ needs_improvement；
/// 其余按最终投入度落到 satisfactory / good。
pub fn classify_outcome(
    reason: &EndReason,
    final_engagement: f64,
    adaptation_count: usize,
) -> SessionOutcome {
    match reason {
        EndReason::ObjectiveAchieved => {
            if final_engagement >= 0.7 {
                SessionOutcome::Excellent
            } else {
                SessionOutcome::Good
            }
        }
        EndReason::PersistentDisengagement => SessionOutcome::NeedsImprovement,
        EndReason::ExcessiveAdaptations => SessionOutcome::Challenging,
        _ if adaptation_count > 7 => SessionOutcome::Challenging,
        _ if final_engagement < 0.3 => SessionOutcome::NeedsImprovement,
        _ if final_engagement >= 0.6 => SessionOutcome::Good,
        _ => SessionOutcome::Satisfactory,
    }
}

/// 生成会话总结
pub fn build_summary(
    session: &Session,
    reason: EndReason,
    final_engagement: f64,
    final_trust: f64,
) -> SessionSummary {
    let adaptation_count = session.adaptation_history.len();
    let outcome = classify_outcome(&reason, final_engagement, adaptation_count);
    let duration_secs = session.elapsed().as_secs();

    let mut insights = Vec::new();
    if adaptation_count == 0 {
        insights.push("Initial experience held for the whole session".to_string());
    } else {
        insights.push(format!(
            "Experience adapted {} time(s); most recent trigger: {}",
            adaptation_count,
            session
                .adaptation_history
                .last()
                .map(|a| a.trigger.as_str())
                .unwrap_or("unknown")
        ));
    }
    if final_engagement >= 0.7 {
        insights.push("Engagement finished high".to_string());
    } else if final_engagement < 0.3 {
        insights.push("Engagement finished low".to_string());
    }

    let mut recommendations = Vec::new();
    match outcome {
        SessionOutcome::Excellent | SessionOutcome::Good => {
            recommendations.push("Increase difficulty for the next session".to_string());
        }
        SessionOutcome::Challenging => {
            recommendations.push(
                "Review adaptation triggers; consider a different starting modality".to_string(),
            );
        }
        SessionOutcome::NeedsImprovement => {
            recommendations
                .push("Start the next session with a shorter, simpler experience".to_string());
        }
        SessionOutcome::Satisfactory => {
            recommendations.push("Keep the current difficulty and modality".to_string());
        }
    }

    SessionSummary {
        session_id: session.id.clone(),
        subject_id: session.subject_id.clone(),
        objective: session.objective.clone(),
        reason,
        outcome,
        duration_secs,
        total_adaptations: adaptation_count,
        final_engagement,
        final_trust,
        insights,
        recommendations,
        ended_at_ms: chrono::Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objective_with_high_engagement_is_excellent() {
        assert_eq!(
            classify_outcome(&EndReason::ObjectiveAchieved, 0.8, 1),
            SessionOutcome::Excellent
        );
        assert_eq!(
            classify_outcome(&EndReason::ObjectiveAchieved, 0.5, 1),
            SessionOutcome::Good
        );
    }

    #[test]
    fn test_many_adaptations_is_challenging() {
        assert_eq!(
            classify_outcome(&EndReason::Timeout, 0.5, 8),
            SessionOutcome::Challenging
        );
        assert_eq!(
            classify_outcome(&EndReason::ExcessiveAdaptations, 0.5, 11),
            SessionOutcome::Challenging
        );
    }

    #[test]
    fn test_disengagement_needs_improvement() {
        assert_eq!(
            classify_outcome(&EndReason::PersistentDisengagement, 0.2, 3),
            SessionOutcome::NeedsImprovement
        );
        assert_eq!(
            classify_outcome(&EndReason::Timeout, 0.1, 0),
            SessionOutcome::NeedsImprovement
        );
    }

    #[test]
    fn test_middling_session_is_satisfactory() {
        assert_eq!(
            classify_outcome(&EndReason::Manual, 0.45, 2),
            SessionOutcome::Satisfactory
        );
        assert_eq!(
            classify_outcome(&EndReason::Timeout, 0.65, 2),
            SessionOutcome::Good
        );
    }
}
