//! Job error types.

use civic_core::CivicError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job store or dead-letter store cannot be reached.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A queue handler returned an error for this attempt.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// A queue handler exceeded its time budget.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// Persisting a dead-letter record failed.
    #[error("Dead-letter write failed: {0}")]
    DeadLetterWrite(String),

    /// Job or dead-letter record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Wraps any displayable error raised by a handler.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        JobError::Handler(err.to_string())
    }

    /// Returns true if the failure originates from the broker connection.
    pub fn is_broker_unavailable(&self) -> bool {
        matches!(self, JobError::BrokerUnavailable(_))
    }
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::BrokerUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        JobError::BrokerUnavailable(err.to_string())
    }
}

impl From<JobError> for CivicError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => CivicError::not_found("DeadLetterRecord", id),
            JobError::BrokerUnavailable(msg) => CivicError::Unavailable(msg),
            JobError::Configuration(msg) => CivicError::Configuration(msg),
            other => CivicError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_constructor() {
        let err = JobError::handler("Report not found: 42");
        match err {
            JobError::Handler(msg) => assert!(msg.contains("42")),
            _ => panic!("Expected Handler error"),
        }
    }

    #[test]
    fn test_is_broker_unavailable() {
        assert!(JobError::BrokerUnavailable("refused".into()).is_broker_unavailable());
        assert!(!JobError::Handler("boom".into()).is_broker_unavailable());
    }

    #[test]
    fn test_redis_error_maps_to_broker_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(JobError::from(redis_err).is_broker_unavailable());
    }

    #[test]
    fn test_into_civic_error_not_found() {
        let err: CivicError = JobError::NotFound("rec-1".into()).into();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_into_civic_error_unavailable() {
        let err: CivicError = JobError::BrokerUnavailable("down".into()).into();
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_into_civic_error_other() {
        let err: CivicError = JobError::Timeout(30).into();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_error_display_timeout() {
        let err = JobError::Timeout(60);
        assert!(err.to_string().contains("60"));
    }
}
