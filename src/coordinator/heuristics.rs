//! 行为启发式：遥测派生字段的确定性计算
//!
//! 全部为纯函数，常量来自 [heuristics] 配置段。
//! 这些阈值并非经过验证的领域事实，按部署可调。

use serde::{Deserialize, Serialize};

use crate::config::HeuristicsSection;

use super::telemetry::TrustEventType;

/// 投入度趋势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// 投入度分桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// 信任阶梯（5 阶段，随信任水平单调）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStage {
    Forming,
    Tentative,
    Developing,
    Established,
    Deep,
}

/// 趋势：Δ > 死区 ⇒ increasing，Δ < −死区 ⇒ decreasing，否则 stable
pub fn engagement_trend(prev: f64, new: f64, h: &HeuristicsSection) -> EngagementTrend {
    let delta = new - prev;
    if delta > h.trend_deadband {
        EngagementTrend::Increasing
    } else if delta < -h.trend_deadband {
        EngagementTrend::Decreasing
    } else {
        EngagementTrend::Stable
    }
}

/// 分桶：边界值归入较高桶（0.3 ⇒ medium，0.8 ⇒ very_high）
pub fn engagement_level(score: f64, h: &HeuristicsSection) -> EngagementLevel {
    if score < h.engagement_low {
        EngagementLevel::Low
    } else if score < h.engagement_medium {
        EngagementLevel::Medium
    } else if score < h.engagement_high {
        EngagementLevel::High
    } else {
        EngagementLevel::VeryHigh
    }
}

/// 各信任事件类型的固定增量
pub fn trust_delta(event: TrustEventType, h: &HeuristicsSection) -> f64 {
    match event {
        TrustEventType::VoluntaryInteraction => h.trust_delta_voluntary_interaction,
        TrustEventType::HelpRequest => h.trust_delta_help_request,
        TrustEventType::MistakeAcknowledgment => h.trust_delta_mistake_acknowledgment,
        TrustEventType::PreferenceExpression => h.trust_delta_preference_expression,
        TrustEventType::CreativeSharing => h.trust_delta_creative_sharing,
    }
}

/// 信任阶梯：阈值 0.2 / 0.4 / 0.6 / 0.8，随 level 单调不减
pub fn trust_stage(level: f64, h: &HeuristicsSection) -> TrustStage {
    let t = h.trust_stage_thresholds;
    if level < t[0] {
        TrustStage::Forming
    } else if level < t[1] {
        TrustStage::Tentative
    } else if level < t[2] {
        TrustStage::Developing
    } else if level < t[3] {
        TrustStage::Established
    } else {
        TrustStage::Deep
    }
}

/// 交互质量评分
///
/// base 0.5；时长 [1s,30s) 视为认真参与 +0.2；<0.5s 视为噪声 −0.1；
/// 教学语境 +0.2；富细节载荷 +0.1；夹取到 [0,1]。
pub fn interaction_quality(duration_ms: u64, educational: bool, rich_details: bool) -> f64 {
    let mut quality: f64 = 0.5;

    if (1_000..30_000).contains(&duration_ms) {
        quality += 0.2;
    } else if duration_ms < 500 {
        quality -= 0.1;
    }

    if educational {
        quality += 0.2;
    }
    if rich_details {
        quality += 0.1;
    }

    quality.clamp(0.0, 1.0)
}

/// 学习速度 = 成功率 / 耗时（分钟）；耗时为 0 时返回 0
pub fn learning_velocity(success_rate: f64, time_spent_secs: u64) -> f64 {
    let minutes = time_spent_secs as f64 / 60.0;
    if minutes <= f64::EPSILON {
        0.0
    } else {
        success_rate / minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h() -> HeuristicsSection {
        HeuristicsSection::default()
    }

    #[test]
    fn test_trend_deadband() {
        assert_eq!(engagement_trend(0.5, 0.56, &h()), EngagementTrend::Increasing);
        assert_eq!(engagement_trend(0.5, 0.44, &h()), EngagementTrend::Decreasing);
        assert_eq!(engagement_trend(0.5, 0.54, &h()), EngagementTrend::Stable);
        assert_eq!(engagement_trend(0.5, 0.46, &h()), EngagementTrend::Stable);
    }

    #[test]
    fn test_engagement_level_boundaries_go_high() {
        assert_eq!(engagement_level(0.0, &h()), EngagementLevel::Low);
        assert_eq!(engagement_level(0.3, &h()), EngagementLevel::Medium);
        assert_eq!(engagement_level(0.6, &h()), EngagementLevel::High);
        assert_eq!(engagement_level(0.8, &h()), EngagementLevel::VeryHigh);
        assert_eq!(engagement_level(1.0, &h()), EngagementLevel::VeryHigh);
    }

    #[test]
    fn test_trust_stage_monotonic() {
        let mut prev = TrustStage::Forming;
        for i in 0..=100 {
            let stage = trust_stage(i as f64 / 100.0, &h());
            assert!(stage >= prev, "stage regressed at level {}", i);
            prev = stage;
        }
        assert_eq!(prev, TrustStage::Deep);
    }

    #[test]
    fn test_trust_deltas() {
        assert!((trust_delta(TrustEventType::CreativeSharing, &h()) - 0.10).abs() < 1e-9);
        assert!((trust_delta(TrustEventType::HelpRequest, &h()) - 0.08).abs() < 1e-9);
        assert!((trust_delta(TrustEventType::PreferenceExpression, &h()) - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_interaction_quality_buckets() {
        // 认真参与 + 教学语境 + 富细节
        assert!((interaction_quality(5_000, true, true) - 1.0).abs() < 1e-9);
        // 噪声点击
        assert!((interaction_quality(100, false, false) - 0.4).abs() < 1e-9);
        // 超长停留不加分
        assert!((interaction_quality(60_000, false, false) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_learning_velocity() {
        assert!((learning_velocity(0.8, 120) - 0.4).abs() < 1e-9);
        assert_eq!(learning_velocity(0.8, 0), 0.0);
    }
}
