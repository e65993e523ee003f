//! Инициализация `tracing-subscriber` для бинарников.

use crate::{
    config::LoggingConfig,
    error::{EbicsError, Result},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG`, если задан, важнее `level` из конфигурации. Повторный
/// вызов возвращает ошибку.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EbicsError::Config(format!("log level {}: {e}", config.level)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| EbicsError::Config(format!("logging: {e}")))
}
