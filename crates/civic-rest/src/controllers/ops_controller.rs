//! Queue metrics snapshot and Prometheus exposition.

use crate::responses::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use civic_core::CivicError;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Routes mounted under `/api/v1/ops`.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_snapshot))
}

/// The root `/metrics` scrape route.
pub fn prometheus_router() -> Router<AppState> {
    Router::new().route("/metrics", get(prometheus_metrics))
}

async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ops.snapshot().await)
}

async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let render = state.prometheus.as_ref().ok_or_else(|| {
        CivicError::Unavailable("Prometheus exporter is not enabled".to_string())
    })?;

    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], render()))
}
