//! API response types.

use civic_core::{CivicError, ErrorResponse};
use civic_jobs::JobError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Application error type for Axum.
#[derive(Debug)]
pub struct AppError(pub CivicError);

impl From<CivicError> for AppError {
    fn from(err: CivicError) -> Self {
        Self(err)
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.error_code(), "Request failed");
        }

        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<Json<T>, AppError>;
