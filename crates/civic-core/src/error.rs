//! Unified error type shared across crates and the admin HTTP surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type surfaced to callers outside the job core.
///
/// Each variant maps onto an HTTP status and a machine-readable code so the
/// admin surface can render it without knowing where it came from.
#[derive(Error, Debug)]
pub enum CivicError {
    /// A record or resource does not exist
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// The shared broker or a store behind it cannot be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid settings or handler registration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An HTTP collaborator failed or answered with an error status
    #[error("{service} request failed: {message}")]
    ExternalService { service: String, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CivicError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Unavailable(_) => 503,
            Self::ExternalService { .. } => 502,
            Self::Configuration(_) | Self::Internal(_) | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for CivicError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Serializable error body for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `CivicError`.
    #[must_use]
    pub fn from_error(error: &CivicError) -> Self {
        Self {
            error: error.to_string(),
            code: error.error_code().to_string(),
        }
    }
}

impl From<&CivicError> for ErrorResponse {
    fn from(error: &CivicError) -> Self {
        Self::from_error(error)
    }
}
