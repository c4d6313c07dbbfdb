//! HTTP implementations of the handler collaborators.

mod app_api;
mod inference;

pub use app_api::AppApiClient;
pub use inference::{detect_issues, InferenceClient};

use civic_core::CivicError;
use reqwest::Response;

fn external_error(service: &str, err: impl std::fmt::Display) -> CivicError {
    CivicError::ExternalService {
        service: service.to_string(),
        message: err.to_string(),
    }
}

/// Pass a 2xx response through; turn anything else into an external
/// service error carrying status and body.
async fn ensure_success(service: &str, response: Response) -> Result<Response, CivicError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(external_error(service, format!("{}: {}", status, body)))
}
