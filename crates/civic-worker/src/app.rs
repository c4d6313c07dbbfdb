//! Process bootstrap: stores, runtime, handlers and the admin server.

use crate::clients::{AppApiClient, InferenceClient};
use crate::handlers::{NotificationHandler, ReportProcessingHandler};
use civic_config::{AppConfig, ServerConfig};
use civic_core::{CivicError, CivicResult};
use civic_jobs::{
    create_pool, JobRuntime, MetricsRegistry, QueueName, RedisDeadLetterStore, RedisJobStore,
};
use civic_rest::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Connect to Redis and build the job runtime.
pub async fn build_runtime(config: &AppConfig) -> CivicResult<JobRuntime> {
    let pool = create_pool(&config.jobs.redis).await?;

    let store = Arc::new(RedisJobStore::new(pool.clone(), config.jobs.redis.key_prefix.clone()));
    let dead_letters = Arc::new(RedisDeadLetterStore::new(
        pool,
        config.jobs.dead_letter.key_prefix.clone(),
    ));

    Ok(JobRuntime::new(
        store,
        dead_letters,
        MetricsRegistry::new(),
        config.jobs.clone(),
    ))
}

/// Register the report and notification handlers with `runtime`.
pub fn register_handlers(runtime: &JobRuntime, config: &AppConfig) -> CivicResult<()> {
    let api = Arc::new(AppApiClient::new(&config.app_api)?);
    let classifier = Arc::new(InferenceClient::new(&config.inference)?);

    runtime.register(
        QueueName::ReportProcessing,
        ReportProcessingHandler::new(api.clone(), classifier, api.clone(), runtime.producer()),
    )?;
    runtime.register(QueueName::Notifications, NotificationHandler::new(api))?;
    Ok(())
}

/// Bind the admin server listener.
pub async fn bind_admin(server: &ServerConfig) -> CivicResult<TcpListener> {
    let addr = server.addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|e| CivicError::Internal(format!("Failed to bind admin server on {}: {}", addr, e)))
}

/// Run the worker until a shutdown signal arrives.
///
/// The admin listener is bound before any worker starts, so a bind failure
/// leaves nothing running.
pub async fn run(config: AppConfig) -> CivicResult<()> {
    let prometheus = if config.observability.prometheus_enabled {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder");
                None
            }
        }
    } else {
        None
    };

    let listener = bind_admin(&config.server).await?;
    let runtime = build_runtime(&config).await?;
    register_handlers(&runtime, &config)?;
    runtime.start()?;

    let mut state = AppState::from_runtime(&runtime);
    if let Some(handle) = prometheus {
        state = state.with_prometheus(Arc::new(move || handle.render()));
    }
    let router = create_router(state, &config.server);

    info!("Admin server listening on http://{}", config.server.addr());

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    runtime.shutdown().await;

    served.map_err(|e| CivicError::Internal(format!("Admin server error: {}", e)))?;
    info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
