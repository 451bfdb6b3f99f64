use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use crate::config::LogConfig;

/// 安装全局日志
///
/// `RUST_LOG` 优先于配置里的级别；重复调用直接忽略。
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    let _ = if config.json {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
    };
}
