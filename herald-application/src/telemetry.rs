//! 日志初始化
//!
use crate::config::TelemetryConfig;
use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` 订阅者；`RUST_LOG` 优先于配置中的过滤规则
///
/// 可重复调用，已安装时返回 `false`。
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(json = config.json, "tracing initialised");
    }
    installed
}
