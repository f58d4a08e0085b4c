//! 系统事件总线
//!
//! 跨组件通知走显式的发布/订阅服务实例（tokio broadcast），
//! 克隆传入各组件；主题为强类型枚举而非字符串事件名。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::registry::{ComponentStatus, ComponentType};

/// 系统事件（可序列化为 JSON 供外部观察者消费）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    /// 组件完成注册
    ComponentRegistered {
        component_id: String,
        component_type: ComponentType,
    },
    /// 组件注销 / 断连，广播给余下组件
    ComponentDeparted {
        component_id: String,
        component_type: ComponentType,
    },
    /// 心跳导致的健康状态变化
    ComponentStatusChanged {
        component_id: String,
        status: ComponentStatus,
    },
    /// 系统就绪状态翻转
    ReadinessChanged { ready: bool },
    /// 会话启动
    SessionStarted {
        session_id: String,
        subject_id: String,
    },
    /// 会话结束（含原因）
    SessionEnded {
        session_id: String,
        reason: String,
    },
    /// 一次适配已应用到呈现组件
    AdaptationApplied {
        session_id: String,
        adaptation_id: String,
        trigger: String,
    },
    /// 遥测触发的紧急条件，编排器可在下个周期前消费
    CriticalCondition {
        subject_id: String,
        reason: String,
        score: f64,
    },
    /// 缓冲溢出淘汰（显式的数据丢失通告）
    BufferEvicted { evicted: usize, remaining: usize },
    /// 会话内指标显著上升（通知观察者）
    NotableProgress {
        session_id: String,
        engagement_delta: f64,
    },
}

/// 事件总线：broadcast 包装，发布端可克隆，订阅端按需创建
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件；无订阅者时静默丢弃
    pub fn publish(&self, event: SystemEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// 当前订阅者数量
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
