//! 组件注册中心
//!
//! 跟踪已连接的能力提供方（体验生成器、投入度追踪器、呈现面、观察者）：
//! - **注册/注销**：同类型至多一个活跃实例，重复注册先顶替旧实例
//! - **心跳协议**：按固定间隔探测组件声明的健康检查操作
//! - **就绪状态机**：所有必需类型均健康 ⇒ ready，任一失健康立即回退

mod component;
#[allow(clippy::module_inception)]
mod registry;

pub use component::{
    ComponentDefinition, ComponentLink, ComponentRecord, ComponentStatus, ComponentType,
    PeerSummary, RegisterAck,
};
pub use registry::ComponentRegistry;
