//! # Civic Worker
//!
//! Runs the `report-processing` and `notifications` worker pools next to a
//! small admin HTTP server.

use anyhow::Context;
use civic_config::ConfigLoader;
use civic_core::telemetry::init_logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader = ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config = loader.get().await;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting civic worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    civic_worker::app::run(config).await.context("Worker failed")?;
    Ok(())
}
