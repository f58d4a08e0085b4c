//! 编排集成测试：注册 → 遥测 → 编排 → 适配 → 完成 全链路

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mentor::bus::{EventBus, SystemEvent};
use mentor::config::MentorConfig;
use mentor::coordinator::{DataCoordinator, EngagementUpdate, TelemetryUpdate};
use mentor::generator::MockGenerator;
use mentor::orchestrator::Orchestrator;
use mentor::persistence::{InMemorySnapshotStore, SnapshotStore};
use mentor::registry::{ComponentLink, ComponentRegistry};
use mentor::session::{EndReason, Priority, SessionConstraints, SessionManager};
use mentor::MentorError;

struct RecordingLink {
    applied: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl ComponentLink for RecordingLink {
    async fn call(
        &self,
        operation: &str,
        _payload: serde_json::Value,
    ) -> Result<serde_json::Value, MentorError> {
        self.applied.lock().unwrap().push(operation.to_string());
        Ok(serde_json::json!({ "status": "ok" }))
    }
}

struct System {
    registry: Arc<ComponentRegistry>,
    coordinator: Arc<DataCoordinator>,
    sessions: Arc<SessionManager>,
    orchestrator: Arc<Orchestrator>,
    bus: EventBus,
    surface_link: Arc<RecordingLink>,
}

/// 默认配置下的整套系统（Mock 生成器 + 内存快照存储）
fn build_system() -> System {
    let config = MentorConfig::default();
    let bus = EventBus::default();

    let registry = Arc::new(ComponentRegistry::new(config.registry.clone(), bus.clone()));
    let coordinator = Arc::new(DataCoordinator::new(
        config.coordinator.clone(),
        config.heuristics.clone(),
        Arc::new(InMemorySnapshotStore::new()),
        bus.clone(),
    ));
    let generator = Arc::new(MockGenerator);
    let sessions = Arc::new(SessionManager::new(
        config.session.clone(),
        generator.clone(),
        coordinator.profiles(),
        bus.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.clone(),
        config.heuristics.clone(),
        Arc::clone(&registry),
        Arc::clone(&coordinator),
        Arc::clone(&sessions),
        generator,
        bus.clone(),
    ));

    System {
        registry,
        coordinator,
        sessions,
        orchestrator,
        bus,
        surface_link: Arc::new(RecordingLink {
            applied: std::sync::Mutex::new(Vec::new()),
        }),
    }
}

async fn register_all(system: &System) {
    let plain = Arc::new(RecordingLink {
        applied: std::sync::Mutex::new(Vec::new()),
    });
    system
        .registry
        .register(
            "experience_generator",
            "gen_1",
            vec!["generate_experience".into(), "generate_adaptation".into()],
            None,
            plain.clone(),
        )
        .await
        .unwrap();
    system
        .registry
        .register(
            "engagement_tracker",
            "tracker_1",
            vec!["track_engagement".into(), "report_metrics".into()],
            None,
            plain,
        )
        .await
        .unwrap();
    system
        .registry
        .register(
            "presentation_surface",
            "surface_1",
            vec!["apply_experience".into(), "render".into()],
            None,
            system.surface_link.clone(),
        )
        .await
        .unwrap();
    // 首轮心跳把必需组件推到 healthy
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn send_engagement(system: &System, score: f64, times: usize) {
    for _ in 0..times {
        system
            .coordinator
            .ingest(TelemetryUpdate::Engagement(EngagementUpdate {
                subject_id: "subject_1".into(),
                session_id: "session_live".into(),
                score,
                interaction_count: 2,
                time_on_task_secs: 45,
            }))
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_register_telemetry_orchestrate_adapt_complete() {
    let system = build_system();
    assert!(!system.registry.is_ready());

    // 未就绪时编排必须快速失败
    let err = system
        .orchestrator
        .orchestrate("subject_1", "fractions", SessionConstraints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MentorError::NotReady));

    register_all(&system).await;
    assert!(system.registry.is_ready());

    // 低投入遥测先行，画像里已有 3 个低样本
    send_engagement(&system, 0.2, 3).await;

    let mut rx = system.bus.subscribe();
    let (session_id, initial) = system
        .orchestrator
        .orchestrate("subject_1", "fractions", SessionConstraints::default())
        .await
        .unwrap();
    assert!(!initial.fallback_generated);

    // 初始体验已经上屏
    assert!(system
        .surface_link
        .applied
        .lock()
        .unwrap()
        .iter()
        .any(|op| op == "apply_experience"));

    // 一个周期后：低投入触发一次 high 优先级适配
    tokio::time::sleep(Duration::from_secs(11)).await;
    let session = system.sessions.get_session_details(&session_id).await.unwrap();
    assert_eq!(session.adaptation_history.len(), 1);
    assert_eq!(session.adaptation_history[0].trigger, "engagement_drop");
    assert_eq!(session.adaptation_history[0].priority, Priority::High);

    // 适配事件已广播
    let mut saw_adaptation = false;
    while let Ok(event) = rx.try_recv() {
        if let SystemEvent::AdaptationApplied { session_id: sid, trigger, .. } = event {
            assert_eq!(sid, session_id);
            assert_eq!(trigger, "engagement_drop");
            saw_adaptation = true;
        }
    }
    assert!(saw_adaptation);

    // 投入度恢复后手工结束，总结落入历史
    send_engagement(&system, 0.7, 2).await;
    let summary = system
        .orchestrator
        .stop(&session_id, EndReason::Manual)
        .await
        .unwrap()
        .expect("stop returns the summary");
    assert_eq!(summary.reason, EndReason::Manual);
    assert_eq!(summary.total_adaptations, 1);
    assert_eq!(system.orchestrator.active_count().await, 0);
    assert_eq!(system.sessions.active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_is_picked_up_by_orchestrator() {
    let system = build_system();
    register_all(&system).await;
    send_engagement(&system, 0.5, 1).await;

    let constraints = SessionConstraints {
        time_limit_secs: Some(25),
        ..Default::default()
    };
    let (session_id, _) = system
        .orchestrator
        .orchestrate("subject_1", "fractions", constraints)
        .await
        .unwrap();

    // 超时定时器在 25s 结束会话，下一个周期收掉编排状态
    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(system.sessions.active_count().await, 0);
    assert_eq!(system.orchestrator.active_count().await, 0);
    let summary = system.sessions.get_summary(&session_id).await.unwrap();
    assert_eq!(summary.reason, EndReason::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_synced_to_snapshot_store() {
    let config = MentorConfig::default();
    let bus = EventBus::default();
    let store = Arc::new(InMemorySnapshotStore::new());
    let coordinator = Arc::new(DataCoordinator::new(
        config.coordinator.clone(),
        config.heuristics.clone(),
        store.clone(),
        bus,
    ));

    let token = CancellationToken::new();
    let handle = coordinator.start_sync(token.clone());

    coordinator
        .ingest(TelemetryUpdate::Engagement(EngagementUpdate {
            subject_id: "subject_1".into(),
            session_id: "session_live".into(),
            score: 0.6,
            interaction_count: 1,
            time_on_task_secs: 20,
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(store.len().await, 1);
    let snapshot = store.load_profile("subject_1").await.unwrap().unwrap();
    assert!((snapshot.engagement.score - 0.6).abs() < 1e-9);

    token.cancel();
    handle.await.unwrap();
}
