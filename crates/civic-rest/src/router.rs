//! Main application router.

use crate::{
    controllers::{dead_letter_controller, health_controller, ops_controller},
    middleware::logging_middleware,
    state::AppState,
};
use axum::{middleware, routing::get, Router};
use civic_config::ServerConfig;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Creates the admin router.
pub fn create_router(state: AppState, server_config: &ServerConfig) -> Router {
    let api_router = Router::new()
        .nest("/dead-letters", dead_letter_controller::router())
        .nest("/ops", ops_controller::router());

    let router = Router::new()
        .merge(health_controller::router())
        .merge(ops_controller::prometheus_router())
        .nest("/api/v1", api_router)
        .route("/", get(root))
        .with_state(state)
        .layer(create_cors_layer(server_config))
        .layer(TimeoutLayer::new(request_timeout(server_config)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware));

    info!(addr = %server_config.addr(), "Admin router created");
    router
}

fn request_timeout(server_config: &ServerConfig) -> Duration {
    server_config.request_timeout().max(Duration::from_secs(1))
}

/// Creates a CORS layer based on server configuration.
fn create_cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if server_config.cors_enabled {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "Civic job worker admin API v1"
}
