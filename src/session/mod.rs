//! 会话管理器
//!
//! 拥有会话生命周期：创建（含初始体验获取与降级）、超时、更新、
//! 结束（恰好一次）与总结生成；历史归档后由保留清扫周期清理。

mod summary;
mod types;

pub use summary::{build_summary, classify_outcome};
pub use types::{
    AdaptationRecord, EndReason, MetricsSnapshot, Priority, Session, SessionConstraints,
    SessionOutcome, SessionStatus, SessionSummary,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, SystemEvent};
use crate::config::SessionSection;
use crate::coordinator::ProfileStore;
use crate::error::MentorError;
use crate::generator::{synth_default_experience, Experience, ExperienceGenerator};

/// 显著投入度上升阈值：超过则通知观察者
const NOTABLE_ENGAGEMENT_DELTA: f64 = 0.2;

/// 归档条目：总结 + 单调结束时刻（保留清扫用）
struct ArchivedSession {
    summary: SessionSummary,
    ended_at: Instant,
}

/// 会话更新补丁（未给出的字段不动）
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub current_experience: Option<Experience>,
    pub metrics: Option<MetricsSnapshot>,
}

/// 会话管理器
pub struct SessionManager {
    config: SessionSection,
    generator: Arc<dyn ExperienceGenerator>,
    profiles: Arc<ProfileStore>,
    active: RwLock<HashMap<String, Session>>,
    history: RwLock<HashMap<String, ArchivedSession>>,
    bus: EventBus,
}

impl SessionManager {
    pub fn new(
        config: SessionSection,
        generator: Arc<dyn ExperienceGenerator>,
        profiles: Arc<ProfileStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            generator,
            profiles,
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// 创建会话并武装硬超时
    ///
    /// 初始体验向生成器请求，失败时本地合成降级体验（不阻塞创建）。
    pub async fn create_session(
        self: &Arc<Self>,
        subject_id: &str,
        objective: &str,
        constraints: SessionConstraints,
        context: serde_json::Value,
    ) -> Result<(String, Experience), MentorError> {
        let profile = self.profiles.get_or_default(subject_id).await;
        let prior = self.history_count_for(subject_id).await;
        tracing::debug!(
            "Creating session for {} ({} prior sessions on record)",
            subject_id,
            prior
        );

        let time_limit = constraints
            .time_limit_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_time_limit());

        let initial = match self
            .generator
            .generate_experience(objective, &profile, &context)
            .await
        {
            Ok(exp) => exp,
            Err(e) => {
                tracing::warn!(
                    "Initial experience generation failed ({}), using synthesized default",
                    e
                );
                synth_default_experience(objective)
            }
        };

        let mut session = Session::new(subject_id, objective, time_limit, constraints, initial.clone());
        session.status = SessionStatus::Active;
        let session_id = session.id.clone();
        let timeout_token = session.timeout_token.clone();

        self.active.write().await.insert(session_id.clone(), session);

        // 恰好一个超时定时器：显式结束时经 token 撤销
        let manager = Arc::clone(self);
        let timer_session_id = session_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timeout_token.cancelled() => {}
                _ = tokio::time::sleep(time_limit) => {
                    tracing::info!("Session {} hit its time limit", timer_session_id);
                    if let Err(e) = manager.end_session(&timer_session_id, EndReason::Timeout).await {
                        tracing::warn!("Timeout end for {} failed: {}", timer_session_id, e);
                    }
                }
            }
        });

        tracing::info!("Session {} started for {}", session_id, subject_id);
        self.bus.publish(SystemEvent::SessionStarted {
            session_id: session_id.clone(),
            subject_id: subject_id.to_string(),
        });

        Ok((session_id, initial))
    }

    /// 合并字段更新；显著投入度上升会通知观察者
    pub async fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(), MentorError> {
        let mut active = self.active.write().await;
        let session = active
            .get_mut(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;

        if let Some(experience) = patch.current_experience {
            session.current_experience = experience;
        }

        if let Some(snapshot) = patch.metrics {
            let delta = session
                .last_engagement()
                .map(|prev| snapshot.engagement_score - prev);
            session.metrics_history.push_back(snapshot);
            while session.metrics_history.len() > self.config.max_metrics_snapshots {
                session.metrics_history.pop_front();
            }

            if let Some(delta) = delta {
                if delta >= NOTABLE_ENGAGEMENT_DELTA {
                    self.bus.publish(SystemEvent::NotableProgress {
                        session_id: session_id.to_string(),
                        engagement_delta: delta,
                    });
                }
            }
        }

        Ok(())
    }

    /// 追加适配记录并切换当前体验（记录不可变，只追加）
    pub async fn record_adaptation(
        &self,
        session_id: &str,
        record: AdaptationRecord,
        new_experience: Experience,
    ) -> Result<(), MentorError> {
        let mut active = self.active.write().await;
        let session = active
            .get_mut(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;
        session.adaptation_history.push(record);
        session.current_experience = new_experience;
        Ok(())
    }

    /// 活跃会话快照
    pub async fn get_session_details(&self, session_id: &str) -> Result<Session, MentorError> {
        self.active
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))
    }

    /// 以只读方式访问活跃会话
    pub async fn with_session<F, R>(&self, session_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Session) -> R,
    {
        self.active.read().await.get(session_id).map(f)
    }

    /// 结束会话（幂等）：取消超时定时器、分档、归档并通知
    ///
    /// 已结束的会话返回 Ok(None) 并告警；完全未知的 id 返回 SessionNotFound。
    pub async fn end_session(
        &self,
        session_id: &str,
        reason: EndReason,
    ) -> Result<Option<SessionSummary>, MentorError> {
        let removed = self.active.write().await.remove(session_id);

        let Some(mut session) = removed else {
            if self.history.read().await.contains_key(session_id) {
                tracing::warn!(
                    "end_session called on already-ended session {} ({})",
                    session_id,
                    reason
                );
                return Ok(None);
            }
            return Err(MentorError::SessionNotFound(session_id.to_string()));
        };

        session.timeout_token.cancel();
        session.status = SessionStatus::Completed;

        let profile = self.profiles.get_or_default(&session.subject_id).await;
        let summary = build_summary(
            &session,
            reason.clone(),
            profile.engagement.score,
            profile.trust.level,
        );

        tracing::info!(
            "Session {} ended: reason={} outcome={:?} adaptations={}",
            session_id,
            reason,
            summary.outcome,
            summary.total_adaptations
        );

        self.history.write().await.insert(
            session_id.to_string(),
            ArchivedSession {
                summary: summary.clone(),
                ended_at: Instant::now(),
            },
        );

        self.bus.publish(SystemEvent::SessionEnded {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        });

        Ok(Some(summary))
    }

    /// 历史总结查询
    pub async fn get_summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.history
            .read()
            .await
            .get(session_id)
            .map(|a| a.summary.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn history_count(&self) -> usize {
        self.history.read().await.len()
    }

    async fn history_count_for(&self, subject_id: &str) -> usize {
        self.history
            .read()
            .await
            .values()
            .filter(|a| a.summary.subject_id == subject_id)
            .count()
    }

    /// 清理超过保留窗口的历史条目，返回清理数
    pub async fn purge_expired_history(&self) -> usize {
        let retention = self.config.retention();
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|_, a| a.ended_at.elapsed() <= retention);
        before - history.len()
    }

    /// 启动周期保留清扫
    pub fn start_retention_sweep(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.retention_sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = manager.purge_expired_history().await;
                        if purged > 0 {
                            tracing::info!("Retention sweep purged {} archived sessions", purged);
                        }
                    }
                }
            }
        })
    }
}
