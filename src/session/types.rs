//! 会话数据模型

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::generator::Experience;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Completed,
}

/// 适配优先级：严格序 high > medium > low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// 硬超时触发
    Timeout,
    /// 目标达成启发式命中
    ObjectiveAchieved,
    /// 适配次数超过硬上限
    ExcessiveAdaptations,
    /// 持续低投入超过宽限期
    PersistentDisengagement,
    /// 调用方显式结束
    Manual,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Timeout => write!(f, "timeout"),
            EndReason::ObjectiveAchieved => write!(f, "objective_achieved"),
            EndReason::ExcessiveAdaptations => write!(f, "excessive_adaptations"),
            EndReason::PersistentDisengagement => write!(f, "persistent_disengagement"),
            EndReason::Manual => write!(f, "manual"),
        }
    }
}

/// 创建会话时的约束（未给出的项用配置默认值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConstraints {
    /// 覆盖默认硬超时（秒）
    pub time_limit_secs: Option<u64>,
    /// 覆盖默认适配上限
    pub max_adaptations: Option<usize>,
}

/// 一次已应用的体验变更；创建后不可变，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationRecord {
    pub id: String,
    /// 触发来源（engagement_drop / trust_decline / stuck_on_concept…）
    pub trigger: String,
    /// 适配种类（候选的 type 字段）
    pub kind: String,
    pub priority: Priority,
    pub previous_experience_id: String,
    pub new_experience_id: String,
    pub strategy: String,
    pub confidence: f64,
    pub timestamp_ms: i64,
}

impl AdaptationRecord {
    pub fn new(
        trigger: impl Into<String>,
        kind: impl Into<String>,
        priority: Priority,
        previous_experience_id: impl Into<String>,
        new_experience_id: impl Into<String>,
        strategy: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: format!("adapt_{}", uuid::Uuid::new_v4()),
            trigger: trigger.into(),
            kind: kind.into(),
            priority,
            previous_experience_id: previous_experience_id.into(),
            new_experience_id: new_experience_id.into(),
            strategy: strategy.into(),
            confidence,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 周期性滚动指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub engagement_score: f64,
    pub trust_level: f64,
    pub adaptation_count: usize,
    pub elapsed_secs: u64,
    pub timestamp_ms: i64,
}

/// 单个活跃会话
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub objective: String,
    pub status: SessionStatus,
    pub started_at_ms: i64,
    /// 时长与超时判断用单调时钟
    pub started: Instant,
    pub time_limit: Duration,
    pub constraints: SessionConstraints,
    pub current_experience: Experience,
    pub adaptation_history: Vec<AdaptationRecord>,
    pub metrics_history: VecDeque<MetricsSnapshot>,
    /// 恰好一个超时定时器；显式结束时取消
    pub timeout_token: CancellationToken,
}

impl Session {
    pub fn new(
        subject_id: impl Into<String>,
        objective: impl Into<String>,
        time_limit: Duration,
        constraints: SessionConstraints,
        initial_experience: Experience,
    ) -> Self {
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            subject_id: subject_id.into(),
            objective: objective.into(),
            status: SessionStatus::Initializing,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
            time_limit,
            constraints,
            current_experience: initial_experience,
            adaptation_history: Vec::new(),
            metrics_history: VecDeque::new(),
            timeout_token: CancellationToken::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 最后一次快照的投入度（无快照时 None）
    pub fn last_engagement(&self) -> Option<f64> {
        self.metrics_history.back().map(|m| m.engagement_score)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subject_id", &self.subject_id)
            .field("status", &self.status)
            .field("adaptations", &self.adaptation_history.len())
            .finish()
    }
}

/// 会话结果档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Excellent,
    Good,
    Satisfactory,
    Challenging,
    NeedsImprovement,
}

/// 会话总结：指标、洞察与后续建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub subject_id: String,
    pub objective: String,
    pub reason: EndReason,
    pub outcome: SessionOutcome,
    pub duration_secs: u64,
    pub total_adaptations: usize,
    pub final_engagement: f64,
    pub final_trust: f64,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub ended_at_ms: i64,
}
