//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MENTOR__*` 覆盖（双下划线表示嵌套，
//! 如 `MENTOR__ORCHESTRATOR__CYCLE_INTERVAL_SECS=5`）。
//!
//! 所有启发式常量（投入度阈值、信任增量、各类定时器）均为可调配置，
//! 默认值未经实证校验，部署时可按需覆盖。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MentorConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub heuristics: HeuristicsSection,
}

/// [registry] 段：心跳协议参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// 心跳探测间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 距上次成功心跳多久后判为 stale（秒）
    pub heartbeat_timeout_secs: u64,
    /// 单次健康检查请求的响应上限（秒）
    pub health_check_timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 45,
            health_check_timeout_secs: 5,
        }
    }
}

/// [coordinator] 段：缓冲与同步节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// 缓冲条目总数上限，超过则淘汰最旧的 ~10%
    pub max_buffer_entries: usize,
    /// 周期同步间隔（秒），慢于缓冲写入
    pub sync_interval_secs: u64,
    /// 画像快照在外部存储中的 TTL（秒）
    pub snapshot_ttl_secs: u64,
    /// 投入度硬下限：低于此值立即标记 critical
    pub critical_engagement_floor: f64,
    /// 信任危机下限
    pub critical_trust_floor: f64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            max_buffer_entries: 500,
            sync_interval_secs: 5,
            snapshot_ttl_secs: 3600,
            critical_engagement_floor: 0.2,
            critical_trust_floor: 0.15,
        }
    }
}

/// [session] 段：会话时限与保留策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 会话硬超时（秒），constraints 可覆盖
    pub default_time_limit_secs: u64,
    /// 历史保留窗口（天）
    pub retention_days: u64,
    /// 保留清扫间隔（秒）
    pub retention_sweep_interval_secs: u64,
    /// 单个会话保留的指标快照条数
    pub max_metrics_snapshots: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_time_limit_secs: 1800,
            retention_days: 7,
            retention_sweep_interval_secs: 3600,
            max_metrics_snapshots: 100,
        }
    }
}

/// [orchestrator] 段：编排周期与完成条件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 编排周期间隔（秒）
    pub cycle_interval_secs: u64,
    /// 跨组件请求超时（秒）
    pub request_timeout_secs: u64,
    /// 生成器重试次数（含首次）
    pub generator_max_attempts: u32,
    /// 重试退避基数（毫秒），按次数线性放大
    pub generator_backoff_ms: u64,
    /// 适配次数硬上限，超过则结束编排
    pub max_adaptations: usize,
    /// 持续低投入宽限期（秒）
    pub disengagement_grace_secs: u64,
    /// 判定 objective_achieved 前的最短运行时间（秒）
    pub min_runtime_secs: u64,
    /// 多久无需适配视为可推进（advancement_opportunity）
    pub advancement_elapsed_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 10,
            request_timeout_secs: 5,
            generator_max_attempts: 3,
            generator_backoff_ms: 250,
            max_adaptations: 10,
            disengagement_grace_secs: 600,
            min_runtime_secs: 300,
            advancement_elapsed_secs: 300,
        }
    }
}

/// [heuristics] 段：行为启发式常量（默认值未经实证，待评审）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeuristicsSection {
    /// 投入度趋势死区：|Δ| 小于等于此值视为 stable
    pub trend_deadband: f64,
    /// 投入度分桶阈值：low / medium / high 的上界
    pub engagement_low: f64,
    pub engagement_medium: f64,
    pub engagement_high: f64,
    /// 触发 engagement_drop 候选的阈值
    pub low_engagement_threshold: f64,
    /// 信任阶梯阈值（4 个边界划出 5 个阶段）
    pub trust_stage_thresholds: [f64; 4],
    /// 各信任事件的增量
    pub trust_delta_voluntary_interaction: f64,
    pub trust_delta_help_request: f64,
    pub trust_delta_mistake_acknowledgment: f64,
    pub trust_delta_preference_expression: f64,
    pub trust_delta_creative_sharing: f64,
    /// objective_achieved 启发式：投入度 / 信任下限与适配次数上限
    pub objective_engagement_min: f64,
    pub objective_trust_min: f64,
    pub objective_max_adaptations: usize,
}

impl Default for HeuristicsSection {
    fn default() -> Self {
        Self {
            trend_deadband: 0.05,
            engagement_low: 0.3,
            engagement_medium: 0.6,
            engagement_high: 0.8,
            low_engagement_threshold: 0.3,
            trust_stage_thresholds: [0.2, 0.4, 0.6, 0.8],
            trust_delta_voluntary_interaction: 0.05,
            trust_delta_help_request: 0.08,
            trust_delta_mistake_acknowledgment: 0.06,
            trust_delta_preference_expression: 0.04,
            trust_delta_creative_sharing: 0.10,
            objective_engagement_min: 0.75,
            objective_trust_min: 0.6,
            objective_max_adaptations: 2,
        }
    }
}

impl RegistrySection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

impl CoordinatorSection {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

impl SessionSection {
    pub fn default_time_limit(&self) -> Duration {
        Duration::from_secs(self.default_time_limit_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }
}

impl OrchestratorSection {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn disengagement_grace(&self) -> Duration {
        Duration::from_secs(self.disengagement_grace_secs)
    }

    pub fn min_runtime(&self) -> Duration {
        Duration::from_secs(self.min_runtime_secs)
    }

    pub fn advancement_elapsed(&self) -> Duration {
        Duration::from_secs(self.advancement_elapsed_secs)
    }
}

/// 从 config 目录加载配置，环境变量 MENTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MENTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<MentorConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MENTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = MentorConfig::default();
        assert_eq!(cfg.registry.heartbeat_interval_secs, 30);
        assert_eq!(cfg.registry.heartbeat_timeout_secs, 45);
        assert_eq!(cfg.coordinator.sync_interval_secs, 5);
        assert_eq!(cfg.session.default_time_limit_secs, 1800);
        assert_eq!(cfg.orchestrator.cycle_interval_secs, 10);
        assert_eq!(cfg.orchestrator.max_adaptations, 10);
    }

    #[test]
    fn test_heuristics_defaults_match_source() {
        let h = HeuristicsSection::default();
        assert!((h.trust_delta_creative_sharing - 0.10).abs() < f64::EPSILON);
        assert_eq!(h.trust_stage_thresholds, [0.2, 0.4, 0.6, 0.8]);
        assert!((h.engagement_high - 0.8).abs() < f64::EPSILON);
    }
}
