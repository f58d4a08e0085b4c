//! 组件类型定义与连接抽象
//!
//! 组件类型是封闭枚举 + 静态定义表（必需性、预期能力、健康检查操作名），
//! 不做松散的字符串 type 分发；能力到处理方的解析在注册时完成一次。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::MentorError;

/// 组件类型（能力提供方的种类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// 体验/内容生成服务
    ExperienceGenerator,
    /// 浏览器侧遥测采集端
    EngagementTracker,
    /// 呈现面（实际展示体验的前端）
    PresentationSurface,
    /// 可选的旁路观察者
    Observer,
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentType::ExperienceGenerator => write!(f, "experience_generator"),
            ComponentType::EngagementTracker => write!(f, "engagement_tracker"),
            ComponentType::PresentationSurface => write!(f, "presentation_surface"),
            ComponentType::Observer => write!(f, "observer"),
        }
    }
}

/// 组件类型的静态定义：必需性、预期能力集、健康检查操作名
#[derive(Debug, Clone, Copy)]
pub struct ComponentDefinition {
    pub required: bool,
    pub expected_capabilities: &'static [&'static str],
    pub health_check_operation: &'static str,
}

impl ComponentType {
    /// 定义表：注册时据此校验类型与解析健康检查操作
    pub fn definition(&self) -> ComponentDefinition {
        match self {
            ComponentType::ExperienceGenerator => ComponentDefinition {
                required: true,
                expected_capabilities: &["generate_experience", "generate_adaptation"],
                health_check_operation: "generator_status",
            },
            ComponentType::EngagementTracker => ComponentDefinition {
                required: true,
                expected_capabilities: &["track_engagement", "report_metrics"],
                health_check_operation: "tracker_status",
            },
            ComponentType::PresentationSurface => ComponentDefinition {
                required: true,
                expected_capabilities: &["apply_experience", "render"],
                health_check_operation: "surface_status",
            },
            ComponentType::Observer => ComponentDefinition {
                required: false,
                expected_capabilities: &["observe"],
                health_check_operation: "observer_status",
            },
        }
    }

    /// 按字符串解析（注册请求来自外部，type 字段是字符串）
    pub fn parse(s: &str) -> Result<Self, MentorError> {
        match s {
            "experience_generator" => Ok(Self::ExperienceGenerator),
            "engagement_tracker" => Ok(Self::EngagementTracker),
            "presentation_surface" => Ok(Self::PresentationSurface),
            "observer" => Ok(Self::Observer),
            other => Err(MentorError::UnknownComponentType(other.to_string())),
        }
    }

    /// 全部必需类型
    pub fn required_types() -> &'static [ComponentType] {
        &[
            ComponentType::ExperienceGenerator,
            ComponentType::EngagementTracker,
            ComponentType::PresentationSurface,
        ]
    }
}

/// 组件健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// 已连接，尚未通过首次健康检查
    Connected,
    Healthy,
    Unhealthy,
    /// 超过心跳超时未响应
    Stale,
}

impl ComponentStatus {
    /// 就绪判定只认 Healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentStatus::Healthy)
    }
}

/// 到远端组件的异步请求/响应通道
///
/// 每次调用带操作名与 JSON 载荷；超时与重试由调用方负责。
#[async_trait]
pub trait ComponentLink: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, MentorError>;
}

/// 注册中心持有的组件记录
#[derive(Clone)]
pub struct ComponentRecord {
    pub id: String,
    pub component_type: ComponentType,
    pub capabilities: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: ComponentStatus,
    pub last_heartbeat: Instant,
    pub link: Arc<dyn ComponentLink>,
    /// 注销时取消该组件的心跳任务
    pub heartbeat_token: CancellationToken,
}

impl std::fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("id", &self.id)
            .field("component_type", &self.component_type)
            .field("capabilities", &self.capabilities)
            .field("status", &self.status)
            .finish()
    }
}

/// 同伴摘要：注册确认里带给新组件的在场组件列表
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub component_id: String,
    pub component_type: ComponentType,
    pub status: ComponentStatus,
}

/// 注册确认
#[derive(Debug, Clone, Serialize)]
pub struct RegisterAck {
    pub component_id: String,
    pub system_ready: bool,
    pub peers: Vec<PeerSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(
            ComponentType::parse("experience_generator").unwrap(),
            ComponentType::ExperienceGenerator
        );
        assert_eq!(
            ComponentType::parse("observer").unwrap(),
            ComponentType::Observer
        );
    }

    #[test]
    fn test_parse_unknown_type_fails() {
        let err = ComponentType::parse("billing_service").unwrap_err();
        assert!(matches!(err, MentorError::UnknownComponentType(_)));
    }

    #[test]
    fn test_required_types_exclude_observer() {
        let required = ComponentType::required_types();
        assert_eq!(required.len(), 3);
        assert!(!required.contains(&ComponentType::Observer));
        assert!(!ComponentType::Observer.definition().required);
    }
}
