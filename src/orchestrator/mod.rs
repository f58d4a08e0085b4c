//! 自适应编排器
//!
//! 每个会话一个编排周期（默认 10s）：评估候选 → 选取 → 执行 →
//! 指标快照 → 完成检查。周期内的错误只记日志，不杀定时器；
//! 执行有按会话的 in-flight 保护，周期重入直接跳过而非排队。
//! 完成检查是协作式的：只在 tick 边界评估，进行中的执行先落账再清理。

mod assess;

pub use assess::{assess_candidates, select_primary, AdaptationCandidate};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, SystemEvent};
use crate::config::{HeuristicsSection, OrchestratorSection};
use crate::coordinator::{DataCoordinator, SubjectProfile};
use crate::error::MentorError;
use crate::generator::{AdaptationPlan, Experience, ExperienceGenerator};
use crate::registry::{ComponentRegistry, ComponentType};
use crate::session::{
    AdaptationRecord, EndReason, MetricsSnapshot, Priority, SessionConstraints,
    SessionManager, SessionPatch, SessionSummary,
};

/// 单个会话的编排状态
struct OrchestrationState {
    subject_id: String,
    cycle_token: CancellationToken,
    /// in-flight 保护：true 表示一次执行尚未完成
    executing: AtomicBool,
    /// 外部请求的手工候选，周期开头取走
    manual: Mutex<Vec<AdaptationCandidate>>,
    /// 投入度低于阈值的起点（宽限期计时用）
    low_since: Mutex<Option<Instant>>,
}

/// 完成检查所需的会话切面（不必整份克隆会话）
struct CompletionView {
    elapsed: std::time::Duration,
    time_limit: std::time::Duration,
    adaptations: usize,
    max_adaptations: Option<usize>,
}

/// 编排器：注册中心、协调器与会话管理器之上的控制回路
pub struct Orchestrator {
    config: OrchestratorSection,
    heuristics: HeuristicsSection,
    registry: Arc<ComponentRegistry>,
    coordinator: Arc<DataCoordinator>,
    sessions: Arc<SessionManager>,
    generator: Arc<dyn ExperienceGenerator>,
    active: RwLock<HashMap<String, Arc<OrchestrationState>>>,
    bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorSection,
        heuristics: HeuristicsSection,
        registry: Arc<ComponentRegistry>,
        coordinator: Arc<DataCoordinator>,
        sessions: Arc<SessionManager>,
        generator: Arc<dyn ExperienceGenerator>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            heuristics,
            registry,
            coordinator,
            sessions,
            generator,
            active: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// 启动一次编排：统一画像 → 建会话 → 初始体验上屏 → 周期定时器
    ///
    /// 系统未就绪时快速失败，不做部分启动。
    pub async fn orchestrate(
        self: &Arc<Self>,
        subject_id: &str,
        objective: &str,
        constraints: SessionConstraints,
    ) -> Result<(String, Experience), MentorError> {
        if !self.registry.is_ready() {
            return Err(MentorError::NotReady);
        }

        let unified = self.assemble_unified_profile(subject_id).await;
        let (session_id, initial) = self
            .sessions
            .create_session(subject_id, objective, constraints, unified)
            .await?;

        self.apply_to_surface(&session_id, &initial).await;

        let state = Arc::new(OrchestrationState {
            subject_id: subject_id.to_string(),
            cycle_token: CancellationToken::new(),
            executing: AtomicBool::new(false),
            manual: Mutex::new(Vec::new()),
            low_since: Mutex::new(None),
        });
        self.active
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&state));
        self.spawn_cycle(session_id.clone(), state.cycle_token.clone());

        tracing::info!(
            "Orchestration started: session={} subject={} objective={}",
            session_id,
            subject_id,
            objective
        );
        Ok((session_id, initial))
    }

    /// 外部/手工适配请求：入列，下个周期消费
    pub async fn request_adaptation(
        &self,
        session_id: &str,
        trigger: &str,
        priority: Priority,
    ) -> Result<(), MentorError> {
        let active = self.active.read().await;
        let state = active
            .get(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;
        state
            .manual
            .lock()
            .await
            .push(AdaptationCandidate::new("manual", trigger, priority));
        Ok(())
    }

    /// 强制结束：撤销周期，等进行中的执行落账，再结束会话
    pub async fn stop(
        &self,
        session_id: &str,
        reason: EndReason,
    ) -> Result<Option<SessionSummary>, MentorError> {
        let state = self
            .active
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;
        state.cycle_token.cancel();

        while state.executing.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        self.sessions.end_session(session_id, reason).await
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// 统一画像：协调器缓存画像 + 全部指标组件的实时查询
    ///
    /// 凡暴露 `report_metrics` 能力的组件都会被查询；单个查询失败或
    /// 超时只记日志并略过，按组件 id 合并其余响应。
    async fn assemble_unified_profile(&self, subject_id: &str) -> serde_json::Value {
        let cached = self.coordinator.profiles().get_or_default(subject_id).await;
        let mut unified = serde_json::json!({ "profile": cached });

        let payload = serde_json::json!({ "subject_id": subject_id });
        let mut live = serde_json::Map::new();
        for reporter in self.registry.find_by_capability("report_metrics").await {
            match tokio::time::timeout(
                self.config.request_timeout(),
                reporter.link.call("report_metrics", payload.clone()),
            )
            .await
            {
                Ok(Ok(metrics)) => {
                    live.insert(reporter.id.clone(), metrics);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Live metrics from {} for {} failed: {}",
                        reporter.id,
                        subject_id,
                        e
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Live metrics from {} for {} timed out",
                        reporter.id,
                        subject_id
                    );
                }
            }
        }
        if !live.is_empty() {
            unified["live_metrics"] = serde_json::Value::Object(live);
        }

        unified
    }

    fn spawn_cycle(self: &Arc<Self>, session_id: String, token: CancellationToken) {
        let orchestrator = Arc::clone(self);
        let interval = self.config.cycle_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // 创建当下不评估，第一个周期从 interval 之后开始
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // 周期之间不串行：慢执行期间后续 tick 照常评估，
                        // 执行本身由 in-flight 保护去重
                        let orchestrator = Arc::clone(&orchestrator);
                        let session_id = session_id.clone();
                        tokio::spawn(async move {
                            orchestrator.run_cycle(&session_id).await;
                        });
                    }
                }
            }
        });
    }

    /// 单个周期 tick；错误在此消化，定时器永不被杀
    async fn run_cycle(&self, session_id: &str) {
        let Some(state) = self.active.read().await.get(session_id).cloned() else {
            return;
        };

        // 会话可能已被超时定时器结束；同步收掉编排状态
        let session = match self.sessions.get_session_details(session_id).await {
            Ok(s) => s,
            Err(_) => {
                self.retire(session_id).await;
                return;
            }
        };

        let profile = self
            .coordinator
            .profiles()
            .get_or_default(&state.subject_id)
            .await;

        // 1+2: 手工候选在前（先到先评），再加自动评估
        let mut candidates: Vec<AdaptationCandidate> =
            state.manual.lock().await.drain(..).collect();
        candidates.extend(assess_candidates(
            &profile,
            &session,
            &self.heuristics,
            &self.config,
        ));

        // 3: 执行选中的候选
        if let Some(primary) = select_primary(&candidates).cloned() {
            if let Err(e) = self.execute_adaptation(session_id, &state, &primary).await {
                tracing::warn!("Adaptation for {} failed: {}", session_id, e);
            }
        }

        // 4: 指标快照（只读重访会话，拿到刚落账的适配数）
        let Some((snapshot, view)) = self
            .sessions
            .with_session(session_id, |s| {
                (
                    MetricsSnapshot {
                        engagement_score: profile.engagement.score,
                        trust_level: profile.trust.level,
                        adaptation_count: s.adaptation_history.len(),
                        elapsed_secs: s.elapsed().as_secs(),
                        timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    },
                    CompletionView {
                        elapsed: s.elapsed(),
                        time_limit: s.time_limit,
                        adaptations: s.adaptation_history.len(),
                        max_adaptations: s.constraints.max_adaptations,
                    },
                )
            })
            .await
        else {
            self.retire(session_id).await;
            return;
        };
        if let Err(e) = self
            .sessions
            .update_session(
                session_id,
                SessionPatch {
                    metrics: Some(snapshot),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!("Metrics snapshot for {} failed: {}", session_id, e);
        }

        // 5: 完成检查
        if let Some(reason) = self.completion_reason(&state, &view, &profile).await {
            self.finish(session_id, reason).await;
        }
    }

    /// 完成条件，按优先顺序：超时 > 目标达成 > 适配超限 > 持续低投入
    async fn completion_reason(
        &self,
        state: &OrchestrationState,
        view: &CompletionView,
        profile: &SubjectProfile,
    ) -> Option<EndReason> {
        // 有执行在途时推迟到下个 tick：先落账，再清理
        if state.executing.load(Ordering::SeqCst) {
            return None;
        }

        if view.elapsed >= view.time_limit {
            return Some(EndReason::Timeout);
        }

        let h = &self.heuristics;
        if profile.engagement.score >= h.objective_engagement_min
            && profile.trust.level >= h.objective_trust_min
            && view.adaptations <= h.objective_max_adaptations
            && view.elapsed >= self.config.min_runtime()
        {
            return Some(EndReason::ObjectiveAchieved);
        }

        let max_adaptations = view.max_adaptations.unwrap_or(self.config.max_adaptations);
        if view.adaptations > max_adaptations {
            return Some(EndReason::ExcessiveAdaptations);
        }

        let mut low_since = state.low_since.lock().await;
        if profile.engagement.score < h.low_engagement_threshold {
            let since = low_since.get_or_insert_with(Instant::now);
            if since.elapsed() > self.config.disengagement_grace() {
                return Some(EndReason::PersistentDisengagement);
            }
        } else {
            *low_since = None;
        }

        None
    }

    /// 执行一次适配；同会话并发执行被跳过（不排队）
    async fn execute_adaptation(
        &self,
        session_id: &str,
        state: &OrchestrationState,
        candidate: &AdaptationCandidate,
    ) -> Result<(), MentorError> {
        if state
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(
                "Adaptation tick for {} skipped, previous execution still in flight",
                session_id
            );
            return Ok(());
        }

        let result = self.execute_inner(session_id, candidate).await;
        state.executing.store(false, Ordering::SeqCst);
        result
    }

    async fn execute_inner(
        &self,
        session_id: &str,
        candidate: &AdaptationCandidate,
    ) -> Result<(), MentorError> {
        // 执行前重取：画像与会话在评估后可能已变
        let session = self.sessions.get_session_details(session_id).await?;
        let profile = self
            .coordinator
            .profiles()
            .get_or_default(&session.subject_id)
            .await;
        let current = session.current_experience.clone();

        let plan = self
            .generate_with_retry(&current, &profile, &candidate.trigger)
            .await;

        let record = AdaptationRecord::new(
            candidate.trigger.clone(),
            candidate.kind.clone(),
            candidate.priority,
            current.id.clone(),
            plan.new_experience.id.clone(),
            plan.strategy.clone(),
            plan.confidence,
        );
        let adaptation_id = record.id.clone();

        self.sessions
            .record_adaptation(session_id, record, plan.new_experience.clone())
            .await?;

        self.apply_to_surface(session_id, &plan.new_experience).await;
        self.notify_observers(session_id, &adaptation_id, &candidate.trigger);

        tracing::info!(
            "Adaptation {} applied to {}: trigger={} strategy={}",
            adaptation_id,
            session_id,
            candidate.trigger,
            plan.strategy
        );
        self.bus.publish(SystemEvent::AdaptationApplied {
            session_id: session_id.to_string(),
            adaptation_id,
            trigger: candidate.trigger.clone(),
        });

        Ok(())
    }

    /// 有界重试 + 线性退避；耗尽后退回最近可用体验
    async fn generate_with_retry(
        &self,
        current: &Experience,
        profile: &SubjectProfile,
        trigger: &str,
    ) -> AdaptationPlan {
        let engagement = profile.engagement.score;
        for attempt in 1..=self.config.generator_max_attempts {
            match self
                .generator
                .generate_adaptation(current, profile, trigger, engagement)
                .await
            {
                Ok(plan) => return plan,
                Err(e) => {
                    tracing::warn!(
                        "generate_adaptation attempt {}/{} failed: {}",
                        attempt,
                        self.config.generator_max_attempts,
                        e
                    );
                    if attempt < self.config.generator_max_attempts {
                        let backoff = std::time::Duration::from_millis(
                            self.config.generator_backoff_ms * attempt as u64,
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        tracing::warn!("Generator exhausted retries, retaining last known good experience");
        let mut fallback = current.clone();
        fallback.fallback_generated = true;
        AdaptationPlan {
            strategy: "retain_last_known_good".to_string(),
            confidence: 0.2,
            new_experience: fallback,
        }
    }

    /// 体验上屏（失败告警，不中断编排）
    async fn apply_to_surface(&self, session_id: &str, experience: &Experience) {
        let Some(surface) = self
            .registry
            .find_by_type(ComponentType::PresentationSurface)
            .await
        else {
            tracing::warn!("No presentation surface registered, experience not applied");
            return;
        };

        let payload = serde_json::json!({
            "session_id": session_id,
            "experience": experience,
        });
        match tokio::time::timeout(
            self.config.request_timeout(),
            surface.link.call("apply_experience", payload),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("apply_experience on {} failed: {}", surface.id, e),
            Err(_) => tracing::warn!("apply_experience on {} timed out", surface.id),
        }
    }

    /// 旁路观察者通知（尽力而为，不等待）
    fn notify_observers(&self, session_id: &str, adaptation_id: &str, trigger: &str) {
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.request_timeout();
        let payload = serde_json::json!({
            "session_id": session_id,
            "adaptation_id": adaptation_id,
            "trigger": trigger,
        });
        tokio::spawn(async move {
            if let Some(observer) = registry.find_by_type(ComponentType::Observer).await {
                if tokio::time::timeout(timeout, observer.link.call("observe", payload))
                    .await
                    .is_err()
                {
                    tracing::debug!("Observer notification timed out");
                }
            }
        });
    }

    /// 结束会话并收掉编排状态
    async fn finish(&self, session_id: &str, reason: EndReason) {
        if let Some(state) = self.active.write().await.remove(session_id) {
            state.cycle_token.cancel();
        }
        match self.sessions.end_session(session_id, reason.clone()).await {
            Ok(Some(summary)) => {
                tracing::info!(
                    "Orchestration finished for {}: reason={} outcome={:?}",
                    session_id,
                    reason,
                    summary.outcome
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Ending session {} failed: {}", session_id, e),
        }
    }

    /// 会话已在别处结束（如超时定时器），只清编排状态
    async fn retire(&self, session_id: &str) {
        if let Some(state) = self.active.write().await.remove(session_id) {
            state.cycle_token.cancel();
            tracing::debug!("Orchestration state for {} retired", session_id);
        }
    }
}
