//! Logging initialization.
//!
//! Sets up a `tracing` subscriber with an `EnvFilter` and either human
//! readable or JSON output.

#[cfg(feature = "telemetry")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::CivicResult;
use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of the pretty console format.
    #[serde(default)]
    pub json: bool,

    /// Include the event target (module path) in output.
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_filter() -> String {
    "info,civic=debug,tower_http=debug".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
#[cfg(feature = "telemetry")]
pub fn init_logging(config: &LoggingConfig) -> CivicResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| crate::CivicError::Configuration(format!("Invalid log filter: {}", e)))?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(json = config.json, filter = %config.filter, "Logging initialized");
    }

    Ok(())
}

/// Placeholder for when the telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_logging(_config: &LoggingConfig) -> CivicResult<()> {
    Ok(())
}
