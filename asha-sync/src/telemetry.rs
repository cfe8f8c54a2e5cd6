//! Tracing subscriber setup for the binary

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{SyncError, SyncResult};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("asha_sync={},sqlx=warn,reqwest=info", level)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. `verbose` forces `debug`.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> SyncResult<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init(),
        // Structured JSON logging for log shipping
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| SyncError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
