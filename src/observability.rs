//! 可观测性：tracing 订阅器初始化
//!
//! 嵌入方在启动时调用一次；`RUST_LOG` 可覆盖默认级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mentor=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
