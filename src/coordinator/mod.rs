//! 数据协调器
//!
//! 把原始遥测变成校验过、带派生字段的画像状态：
//! validate → process → 画像变更 → 缓冲，外加独立节奏的周期同步
//! （刷缓冲 + 外部快照持久化）。每次成功变更后做一次廉价的
//! 紧急条件检查，编排器可在下个调度周期之前消费。

mod buffer;
mod heuristics;
mod profile;
mod telemetry;

pub use buffer::{BufferedUpdate, EvictionReport, UpdateBuffer};
pub use heuristics::{
    engagement_level, engagement_trend, interaction_quality, learning_velocity, trust_delta,
    trust_stage, EngagementLevel, EngagementTrend, TrustStage,
};
pub use profile::{
    AdaptationOutcomeRecord, ConceptProgress, EngagementSample, EngagementState,
    InteractionRecord, ProfileStore, SubjectProfile, TrustEventRecord, TrustState,
    ADAPTATION_OUTCOME_LIMIT, ENGAGEMENT_HISTORY_LIMIT, INTERACTION_LIMIT, TRUST_EVENT_LIMIT,
};
pub use telemetry::{
    AdaptationOutcomeUpdate, EngagementUpdate, InteractionUpdate, ProgressUpdate, TelemetryUpdate,
    TrustEventType, TrustUpdate,
};

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, SystemEvent};
use crate::config::{CoordinatorSection, HeuristicsSection};
use crate::error::MentorError;
use crate::persistence::SnapshotStore;

/// 一次摄入的结果摘要
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub subject_id: String,
    pub data_type: &'static str,
    /// 命中紧急条件时给出原因（engagement_floor / trust_crisis）
    pub critical: Option<String>,
}

/// 数据协调器
pub struct DataCoordinator {
    config: CoordinatorSection,
    heuristics: HeuristicsSection,
    profiles: Arc<ProfileStore>,
    buffer: Mutex<UpdateBuffer>,
    store: Arc<dyn SnapshotStore>,
    bus: EventBus,
}

impl DataCoordinator {
    pub fn new(
        config: CoordinatorSection,
        heuristics: HeuristicsSection,
        store: Arc<dyn SnapshotStore>,
        bus: EventBus,
    ) -> Self {
        let buffer = Mutex::new(UpdateBuffer::new(config.max_buffer_entries));
        Self {
            config,
            heuristics,
            profiles: Arc::new(ProfileStore::new()),
            buffer,
            store,
            bus,
        }
    }

    /// 画像缓存（编排器读取用）
    pub fn profiles(&self) -> Arc<ProfileStore> {
        Arc::clone(&self.profiles)
    }

    /// 摄入一条遥测：校验 → 派生 → 画像变更 → 缓冲 → 紧急检查
    ///
    /// 校验失败立即返回，画像与缓冲均不变。
    pub async fn ingest(&self, update: TelemetryUpdate) -> Result<IngestOutcome, MentorError> {
        update.validate()?;

        let subject_id = update.subject_id().to_string();
        let data_type = update.data_type();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let h = self.heuristics.clone();

        // 单写者漏斗：派生与合并在写锁内一次完成
        let (engagement_score, trust_level) = self
            .profiles
            .mutate(&subject_id, |profile| {
                match &update {
                    TelemetryUpdate::Engagement(u) => {
                        let prev = profile.engagement.score;
                        profile.engagement.trend = heuristics::engagement_trend(prev, u.score, &h);
                        profile.engagement.level = heuristics::engagement_level(u.score, &h);
                        profile.engagement.score = u.score.clamp(0.0, 1.0);
                        profile.push_engagement_sample(EngagementSample {
                            score: u.score,
                            timestamp_ms: now_ms,
                        });
                    }
                    TelemetryUpdate::Trust(u) => {
                        let delta = heuristics::trust_delta(u.event, &h);
                        profile.trust.level = (profile.trust.level + delta).clamp(0.0, 1.0);
                        profile.trust.stage = heuristics::trust_stage(profile.trust.level, &h);
                        profile.push_trust_event(TrustEventRecord {
                            event: u.event,
                            delta,
                            timestamp_ms: now_ms,
                        });
                    }
                    TelemetryUpdate::Interaction(u) => {
                        let rich = u
                            .details
                            .as_ref()
                            .and_then(|d| d.as_object())
                            .map(|o| o.len() > 1)
                            .unwrap_or(false);
                        let quality = heuristics::interaction_quality(
                            u.duration_ms,
                            u.educational_context,
                            rich,
                        );
                        profile.push_interaction(InteractionRecord {
                            kind: u.kind.clone(),
                            duration_ms: u.duration_ms,
                            quality,
                            timestamp_ms: now_ms,
                        });
                    }
                    TelemetryUpdate::Progress(u) => {
                        let velocity =
                            heuristics::learning_velocity(u.success_rate, u.time_spent_secs);
                        profile.progress.insert(
                            u.concept.clone(),
                            ConceptProgress {
                                success_rate: u.success_rate,
                                attempts: u.attempts,
                                velocity,
                                last_seen_ms: now_ms,
                            },
                        );
                    }
                    TelemetryUpdate::AdaptationOutcome(u) => {
                        profile.push_adaptation_outcome(AdaptationOutcomeRecord {
                            adaptation_id: u.adaptation_id.clone(),
                            accepted: u.accepted,
                            engagement_delta: u.engagement_delta,
                            timestamp_ms: now_ms,
                        });
                    }
                }
                (profile.engagement.score, profile.trust.level)
            })
            .await;

        // 缓冲写入：同键覆盖；溢出淘汰是显式告警
        let payload = serde_json::to_value(&update)
            .map_err(|e| MentorError::OrchestrationFailure(e.to_string()))?;
        let eviction = self.buffer.lock().await.put(&subject_id, data_type, payload);
        if let Some(report) = eviction {
            tracing::warn!(
                "Update buffer overflow: evicted {} oldest entries, {} remaining",
                report.evicted,
                report.remaining
            );
            self.bus.publish(SystemEvent::BufferEvicted {
                evicted: report.evicted,
                remaining: report.remaining,
            });
        }

        // 廉价紧急检查：硬下限直接上报，不等下个编排周期
        let critical = if engagement_score < self.config.critical_engagement_floor {
            Some("engagement_floor".to_string())
        } else if trust_level < self.config.critical_trust_floor {
            Some("trust_crisis".to_string())
        } else {
            None
        };
        if let Some(reason) = &critical {
            tracing::warn!("Critical condition for {}: {}", subject_id, reason);
            self.bus.publish(SystemEvent::CriticalCondition {
                subject_id: subject_id.clone(),
                reason: reason.clone(),
                score: if reason == "trust_crisis" {
                    trust_level
                } else {
                    engagement_score
                },
            });
        }

        Ok(IngestOutcome {
            subject_id,
            data_type,
            critical,
        })
    }

    /// 执行一轮同步：刷缓冲并持久化涉及到的画像快照
    ///
    /// 持久化失败只记日志，不中断；下一轮会重写最新快照。
    pub async fn sync_once(&self) -> usize {
        let drained = self.buffer.lock().await.drain();
        if drained.is_empty() {
            return 0;
        }

        let mut subjects: Vec<String> = drained.iter().map(|u| u.subject_id.clone()).collect();
        subjects.sort();
        subjects.dedup();

        tracing::debug!(
            "Syncing {} buffered updates across {} subjects",
            drained.len(),
            subjects.len()
        );

        let profiles = self.profiles.snapshot_many(&subjects).await;
        let ttl = self.config.snapshot_ttl();
        for profile in &profiles {
            if let Err(e) = self
                .store
                .save_profile(&profile.subject_id, profile, ttl)
                .await
            {
                tracing::warn!("Snapshot persistence for {} failed: {}", profile.subject_id, e);
            }
        }

        drained.len()
    }

    /// 启动周期同步任务（慢于缓冲写入的独立节奏）
    pub fn start_sync(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval = self.config.sync_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 首个 tick 立即触发，无需同步空缓冲
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        // 退出前最后刷一轮，避免丢缓冲
                        coordinator.sync_once().await;
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.sync_once().await;
                    }
                }
            }
        })
    }

    /// 当前缓冲条目数（测试用）
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }
}
