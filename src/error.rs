//! 编排核心错误类型
//!
//! 瞬时错误（超时、生成器不可用）由编排循环内部重试 / 降级，
//! 结构性错误（未知类型、未知会话）立即抛给调用方。

use thiserror::Error;

/// 编排核心运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum MentorError {
    /// 注册了定义表中不存在的组件类型
    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Component unavailable: {0}")]
    ComponentUnavailable(String),

    /// 必需组件未就绪，编排请求快速失败
    #[error("System not ready: required components missing or unhealthy")]
    NotReady,

    /// 遥测校验失败：拒绝写入，不改动画像
    #[error("Validation failed on field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Experience generator unavailable: {0}")]
    GeneratorUnavailable(String),

    /// 单个编排周期内的未预期错误（隔离到本次 tick，不影响定时器）
    #[error("Orchestration failure: {0}")]
    OrchestrationFailure(String),
}

impl MentorError {
    /// 构造校验错误的便捷方法
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
