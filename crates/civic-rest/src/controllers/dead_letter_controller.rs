//! Dead-letter listing and requeue.

use crate::extractors::PaginationQuery;
use crate::responses::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use civic_core::PageRequest;
use civic_jobs::DeadLetterRecord;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Create the dead-letter router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_dead_letters))
        .route("/:id/requeue", post(requeue_dead_letter))
}

/// One page of dead-letter records, newest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterPageResponse {
    pub total: u64,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
    pub items: Vec<DeadLetterRecord>,
}

/// Requeue outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub ok: bool,
    pub job_id: String,
}

async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<DeadLetterPageResponse> {
    let request = PageRequest::from(query);
    let page = state.dead_letters.list(request).await?;

    Ok(Json(DeadLetterPageResponse {
        total: page.total,
        page: request.page.saturating_add(1),
        limit: request.limit(),
        items: page.items,
    }))
}

async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RequeueResponse> {
    let job_id = state.requeue.requeue(&id).await?;
    info!(record_id = %id, job_id = %job_id, "Requeued dead-letter record");

    Ok(Json(RequeueResponse {
        ok: true,
        job_id: job_id.to_string(),
    }))
}
