//! 受试者画像：聚合的按人状态与有界历史
//!
//! 画像在首条遥测到达时惰性创建，此后只做增量变更；
//! 内存为权威副本，外部快照由同步任务周期写出。

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::heuristics::{EngagementLevel, EngagementTrend, TrustStage};
use super::telemetry::TrustEventType;

/// 有界历史长度：投入度样本
pub const ENGAGEMENT_HISTORY_LIMIT: usize = 100;
/// 有界历史长度：信任事件
pub const TRUST_EVENT_LIMIT: usize = 50;
/// 有界历史长度：交互记录
pub const INTERACTION_LIMIT: usize = 50;
/// 有界历史长度：适配效果回报
pub const ADAPTATION_OUTCOME_LIMIT: usize = 50;

/// 单次投入度样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementSample {
    pub score: f64,
    pub timestamp_ms: i64,
}

/// 投入度状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementState {
    /// 最新得分，始终在 [0,1]
    pub score: f64,
    pub trend: EngagementTrend,
    pub level: EngagementLevel,
    /// 最近 N 条样本，按到达顺序
    pub history: VecDeque<EngagementSample>,
}

impl Default for EngagementState {
    fn default() -> Self {
        Self {
            score: 0.5,
            trend: EngagementTrend::Stable,
            level: EngagementLevel::Medium,
            history: VecDeque::new(),
        }
    }
}

/// 信任事件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEventRecord {
    pub event: TrustEventType,
    pub delta: f64,
    pub timestamp_ms: i64,
}

/// 信任状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustState {
    /// 信任水平，始终在 [0,1]
    pub level: f64,
    pub stage: TrustStage,
    pub events: VecDeque<TrustEventRecord>,
}

impl Default for TrustState {
    fn default() -> Self {
        Self {
            level: 0.3,
            stage: TrustStage::Tentative,
            events: VecDeque::new(),
        }
    }
}

/// 交互记录（含派生的质量分）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub kind: String,
    pub duration_ms: u64,
    pub quality: f64,
    pub timestamp_ms: i64,
}

/// 单个概念的掌握进度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptProgress {
    pub success_rate: f64,
    pub attempts: u32,
    /// 学习速度 = 成功率 / 分钟
    pub velocity: f64,
    pub last_seen_ms: i64,
}

/// 适配效果记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationOutcomeRecord {
    pub adaptation_id: String,
    pub accepted: bool,
    pub engagement_delta: f64,
    pub timestamp_ms: i64,
}

/// 受试者画像（聚合的按人状态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: String,
    pub engagement: EngagementState,
    pub trust: TrustState,
    pub interactions: VecDeque<InteractionRecord>,
    /// 当前窗口内的平均交互质量
    pub avg_interaction_quality: f64,
    /// 概念 -> 进度
    pub progress: HashMap<String, ConceptProgress>,
    pub adaptation_outcomes: VecDeque<AdaptationOutcomeRecord>,
    pub updated_at_ms: i64,
}

impl SubjectProfile {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            engagement: EngagementState::default(),
            trust: TrustState::default(),
            interactions: VecDeque::new(),
            avg_interaction_quality: 0.0,
            progress: HashMap::new(),
            adaptation_outcomes: VecDeque::new(),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 追加投入度样本并维持上界
    pub fn push_engagement_sample(&mut self, sample: EngagementSample) {
        self.engagement.history.push_back(sample);
        while self.engagement.history.len() > ENGAGEMENT_HISTORY_LIMIT {
            self.engagement.history.pop_front();
        }
    }

    pub fn push_trust_event(&mut self, record: TrustEventRecord) {
        self.trust.events.push_back(record);
        while self.trust.events.len() > TRUST_EVENT_LIMIT {
            self.trust.events.pop_front();
        }
    }

    /// 追加交互记录并重算窗口平均质量
    pub fn push_interaction(&mut self, record: InteractionRecord) {
        self.interactions.push_back(record);
        while self.interactions.len() > INTERACTION_LIMIT {
            self.interactions.pop_front();
        }
        let total: f64 = self.interactions.iter().map(|r| r.quality).sum();
        self.avg_interaction_quality = total / self.interactions.len() as f64;
    }

    pub fn push_adaptation_outcome(&mut self, record: AdaptationOutcomeRecord) {
        self.adaptation_outcomes.push_back(record);
        while self.adaptation_outcomes.len() > ADAPTATION_OUTCOME_LIMIT {
            self.adaptation_outcomes.pop_front();
        }
    }
}

/// 画像缓存：唯一的重要共享可变资源
///
/// 单写者漏斗：所有变更都经过 `mutate` 的写锁；跨受试者的更新可
/// 任意交错，单个受试者的更新按到达顺序生效。若改用真实 OS 线程
/// 重写，必须保留按受试者的互斥来维持该保证。
#[derive(Default)]
pub struct ProfileStore {
    profiles: RwLock<HashMap<String, SubjectProfile>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 变更漏斗：不存在时惰性创建画像，闭包内同步完成全部变更
    pub async fn mutate<F, R>(&self, subject_id: &str, f: F) -> R
    where
        F: FnOnce(&mut SubjectProfile) -> R,
    {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectProfile::new(subject_id));
        profile.updated_at_ms = chrono::Utc::now().timestamp_millis();
        f(profile)
    }

    /// 读取画像快照（克隆）
    pub async fn get(&self, subject_id: &str) -> Option<SubjectProfile> {
        self.profiles.read().await.get(subject_id).cloned()
    }

    /// 读取或新建画像快照
    pub async fn get_or_default(&self, subject_id: &str) -> SubjectProfile {
        self.get(subject_id)
            .await
            .unwrap_or_else(|| SubjectProfile::new(subject_id))
    }

    /// 指定受试者集合的快照（同步任务用）
    pub async fn snapshot_many(&self, subject_ids: &[String]) -> Vec<SubjectProfile> {
        let profiles = self.profiles.read().await;
        subject_ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }
}
