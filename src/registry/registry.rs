//! 注册中心实现：组件表、心跳任务与就绪状态机

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, SystemEvent};
use crate::config::RegistrySection;
use crate::error::MentorError;

use super::component::{
    ComponentLink, ComponentRecord, ComponentStatus, ComponentType, PeerSummary, RegisterAck,
};

/// 组件注册中心
///
/// 所有组件记录在单个 RwLock 表中；注册/注销对同一 id 的竞争由
/// 整个操作持有写锁来串行化。
pub struct ComponentRegistry {
    config: RegistrySection,
    components: Arc<RwLock<HashMap<String, ComponentRecord>>>,
    ready: Arc<AtomicBool>,
    bus: EventBus,
}

impl ComponentRegistry {
    pub fn new(config: RegistrySection, bus: EventBus) -> Self {
        Self {
            config,
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(AtomicBool::new(false)),
            bus,
        }
    }

    /// 注册组件
    ///
    /// - `type_str` 必须在定义表中，否则返回 `UnknownComponentType`
    /// - 同类型已有活跃组件时先注销旧实例（不允许重复活跃）
    /// - 成功后启动心跳任务，重算就绪状态，返回含同伴摘要的确认
    pub async fn register(
        &self,
        type_str: &str,
        id: impl Into<String>,
        capabilities: Vec<String>,
        metadata: Option<serde_json::Value>,
        link: Arc<dyn ComponentLink>,
    ) -> Result<RegisterAck, MentorError> {
        let component_type = ComponentType::parse(type_str)?;
        let id = id.into();
        let definition = component_type.definition();

        for expected in definition.expected_capabilities {
            if !capabilities.iter().any(|c| c == expected) {
                tracing::warn!(
                    "Component {} ({}) missing expected capability '{}'",
                    id,
                    component_type,
                    expected
                );
            }
        }

        let mut components = self.components.write().await;

        // 同类型顶替：旧实例先注销
        let displaced: Option<String> = components
            .values()
            .find(|r| r.component_type == component_type)
            .map(|r| r.id.clone());
        if let Some(old_id) = displaced {
            tracing::info!(
                "Replacing existing {} component {} with {}",
                component_type,
                old_id,
                id
            );
            self.depart_locked(&mut components, &old_id);
        }

        let token = CancellationToken::new();
        let record = ComponentRecord {
            id: id.clone(),
            component_type,
            capabilities,
            metadata,
            status: ComponentStatus::Connected,
            last_heartbeat: Instant::now(),
            link: Arc::clone(&link),
            heartbeat_token: token.clone(),
        };

        let peers: Vec<PeerSummary> = components
            .values()
            .map(|r| PeerSummary {
                component_id: r.id.clone(),
                component_type: r.component_type,
                status: r.status,
            })
            .collect();

        components.insert(id.clone(), record);
        let system_ready = self.recompute_readiness(&components);
        drop(components);

        self.spawn_heartbeat(id.clone(), component_type, link, token);

        tracing::info!("Component {} registered as {}", id, component_type);
        self.bus.publish(SystemEvent::ComponentRegistered {
            component_id: id.clone(),
            component_type,
        });

        Ok(RegisterAck {
            component_id: id,
            system_ready,
            peers,
        })
    }

    /// 注销组件（断连处理走同一路径）
    pub async fn unregister(&self, id: &str) -> Result<(), MentorError> {
        let mut components = self.components.write().await;
        self.depart_locked(&mut components, id)
            .ok_or_else(|| MentorError::ComponentUnavailable(id.to_string()))?;
        self.recompute_readiness(&components);
        drop(components);

        tracing::info!("Component {} unregistered", id);
        Ok(())
    }

    /// 按类型查找（至多一个活跃实例）
    pub async fn find_by_type(&self, component_type: ComponentType) -> Option<ComponentRecord> {
        self.components
            .read()
            .await
            .values()
            .find(|r| r.component_type == component_type)
            .cloned()
    }

    /// 按能力查找（可能命中多个组件）
    pub async fn find_by_capability(&self, capability: &str) -> Vec<ComponentRecord> {
        self.components
            .read()
            .await
            .values()
            .filter(|r| r.capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    /// 系统就绪：所有必需类型均有健康实例
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn component_count(&self) -> usize {
        self.components.read().await.len()
    }

    /// 离场处理：移除记录、撤心跳、通知余下组件并发布离场事件
    ///
    /// 注销与同类型顶替共用此路径；调用方需持有写锁。
    fn depart_locked(
        &self,
        components: &mut HashMap<String, ComponentRecord>,
        id: &str,
    ) -> Option<ComponentRecord> {
        let record = components.remove(id)?;
        record.heartbeat_token.cancel();

        // 向余下组件广播离场通知（尽力而为）
        let payload = serde_json::json!({
            "component_id": record.id,
            "component_type": record.component_type.to_string(),
        });
        let timeout = self.config.health_check_timeout();
        for peer in components.values() {
            let link = Arc::clone(&peer.link);
            let peer_id = peer.id.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if tokio::time::timeout(timeout, link.call("peer_departed", payload))
                    .await
                    .is_err()
                {
                    tracing::debug!("Departure notification to {} timed out", peer_id);
                }
            });
        }

        self.bus.publish(SystemEvent::ComponentDeparted {
            component_id: record.id.clone(),
            component_type: record.component_type,
        });
        Some(record)
    }

    /// 就绪重算；翻转时发布事件。返回新值
    fn recompute_readiness(&self, components: &HashMap<String, ComponentRecord>) -> bool {
        let ready = ComponentType::required_types().iter().all(|t| {
            components
                .values()
                .any(|r| r.component_type == *t && r.status.is_healthy())
        });
        let previous = self.ready.swap(ready, Ordering::SeqCst);
        if previous != ready {
            tracing::info!("System readiness changed: {} -> {}", previous, ready);
            self.bus.publish(SystemEvent::ReadinessChanged { ready });
        }
        ready
    }

    /// 每个组件一个心跳任务：固定间隔探测健康检查操作
    fn spawn_heartbeat(
        &self,
        id: String,
        component_type: ComponentType,
        link: Arc<dyn ComponentLink>,
        token: CancellationToken,
    ) {
        let components = Arc::clone(&self.components);
        let ready = Arc::clone(&self.ready);
        let bus = self.bus.clone();
        let interval = self.config.heartbeat_interval();
        let call_timeout = self.config.health_check_timeout();
        let stale_after = self.config.heartbeat_timeout();
        let health_op = component_type.definition().health_check_operation;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let payload = serde_json::json!({
                    "operation": health_op,
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                });
                let healthy =
                    match tokio::time::timeout(call_timeout, link.call(health_op, payload)).await {
                        Ok(Ok(_)) => true,
                        Ok(Err(e)) => {
                            tracing::warn!("Health check for {} failed: {}", id, e);
                            false
                        }
                        Err(_) => {
                            tracing::warn!(
                                "Health check for {} timed out after {:?}",
                                id,
                                call_timeout
                            );
                            false
                        }
                    };

                let mut guard = components.write().await;
                let Some(record) = guard.get_mut(&id) else {
                    // 已被注销，任务随之结束
                    break;
                };

                let new_status = if healthy {
                    record.last_heartbeat = Instant::now();
                    ComponentStatus::Healthy
                } else if record.last_heartbeat.elapsed() > stale_after {
                    ComponentStatus::Stale
                } else {
                    ComponentStatus::Unhealthy
                };

                if record.status != new_status {
                    tracing::info!(
                        "Component {} status: {:?} -> {:?}",
                        id,
                        record.status,
                        new_status
                    );
                    record.status = new_status;
                    bus.publish(SystemEvent::ComponentStatusChanged {
                        component_id: id.clone(),
                        status: new_status,
                    });

                    let now_ready = ComponentType::required_types().iter().all(|t| {
                        guard
                            .values()
                            .any(|r| r.component_type == *t && r.status.is_healthy())
                    });
                    let previous = ready.swap(now_ready, Ordering::SeqCst);
                    if previous != now_ready {
                        tracing::info!("System readiness changed: {} -> {}", previous, now_ready);
                        bus.publish(SystemEvent::ReadinessChanged { ready: now_ready });
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// 可切换健康状态的 Mock 连接
    struct MockLink {
        healthy: AtomicBool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MockLink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(true),
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ComponentLink for MockLink {
        async fn call(
            &self,
            _operation: &str,
            _payload: serde_json::Value,
        ) -> Result<serde_json::Value, MentorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(serde_json::json!({ "status": "ok", "score": 1.0, "interaction_count": 0 }))
            } else {
                Err(MentorError::RequestTimeout("mock down".to_string()))
            }
        }
    }

    fn test_registry() -> ComponentRegistry {
        ComponentRegistry::new(RegistrySection::default(), EventBus::default())
    }

    async fn register_required(registry: &ComponentRegistry) -> Arc<MockLink> {
        let link = MockLink::new();
        registry
            .register(
                "experience_generator",
                "gen_1",
                vec!["generate_experience".into(), "generate_adaptation".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();
        registry
            .register(
                "engagement_tracker",
                "tracker_1",
                vec!["track_engagement".into(), "report_metrics".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();
        registry
            .register(
                "presentation_surface",
                "surface_1",
                vec!["apply_experience".into(), "render".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();
        link
    }

    #[tokio::test]
    async fn test_register_unknown_type_fails() {
        let registry = test_registry();
        let err = registry
            .register("billing", "b_1", vec![], None, MockLink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MentorError::UnknownComponentType(_)));
    }

    #[tokio::test]
    async fn test_reregister_same_type_keeps_single_active() {
        let registry = test_registry();
        let link = MockLink::new();

        registry
            .register(
                "observer",
                "obs_1",
                vec!["observe".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();
        let first_token = registry
            .find_by_type(ComponentType::Observer)
            .await
            .unwrap()
            .heartbeat_token
            .clone();

        registry
            .register(
                "observer",
                "obs_2",
                vec!["observe".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();

        assert_eq!(registry.component_count().await, 1);
        let active = registry.find_by_type(ComponentType::Observer).await.unwrap();
        assert_eq!(active.id, "obs_2");
        // 旧实例的心跳任务必须已撤销
        assert!(first_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_reregister_publishes_departure_of_displaced() {
        let bus = EventBus::default();
        let registry = ComponentRegistry::new(RegistrySection::default(), bus.clone());
        let link = MockLink::new();

        registry
            .register(
                "observer",
                "obs_1",
                vec!["observe".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();

        // 顶替与注销走同一离场路径：旧实例的离场事件必须可观察
        let mut rx = bus.subscribe();
        registry
            .register(
                "observer",
                "obs_2",
                vec!["observe".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();

        let mut departed = None;
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::ComponentDeparted { component_id, .. } = event {
                departed = Some(component_id);
            }
        }
        assert_eq!(departed.as_deref(), Some("obs_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_requires_all_required_healthy() {
        let registry = test_registry();
        assert!(!registry.is_ready());

        let link = register_required(&registry).await;
        // 首个心跳 tick 立即触发；让任务跑起来
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_ready());

        // 必需组件失健康 ⇒ 下个心跳后立即回退 not_ready
        link.set_healthy(false);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!registry.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_required_flips_not_ready() {
        let registry = test_registry();
        register_required(&registry).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_ready());

        registry.unregister("surface_1").await.unwrap();
        assert!(!registry.is_ready());
        assert_eq!(registry.component_count().await, 2);
    }

    #[tokio::test]
    async fn test_find_by_capability_returns_multiple() {
        let registry = test_registry();
        let link = MockLink::new();
        registry
            .register(
                "engagement_tracker",
                "tracker_1",
                vec!["track_engagement".into(), "report_metrics".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();
        registry
            .register(
                "presentation_surface",
                "surface_1",
                vec!["apply_experience".into(), "render".into(), "report_metrics".into()],
                None,
                link.clone(),
            )
            .await
            .unwrap();

        let found = registry.find_by_capability("report_metrics").await;
        assert_eq!(found.len(), 2);
    }
}
