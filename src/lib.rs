//! Mentor - 自适应会话编排核心
//!
//! 模块划分：
//! - **registry**: 组件注册中心（注册/注销、心跳、就绪状态机）
//! - **coordinator**: 数据协调器（遥测摄入、画像派生、缓冲与周期同步）
//! - **session**: 会话管理器（生命周期、超时、总结与历史保留）
//! - **orchestrator**: 编排器（周期评估、适配执行、完成检查）
//! - **generator**: 体验生成器抽象与 Mock 实现
//! - **persistence**: 画像快照存储抽象
//! - **bus**: 强类型系统事件总线
//! - **config**: 应用配置加载（TOML + 环境变量）

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod session;

pub use error::MentorError;
