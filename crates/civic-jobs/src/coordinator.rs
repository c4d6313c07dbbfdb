//! Retry-or-dead-letter decision for failed attempts.

use crate::dead_letter::{DeadLetterRecord, DeadLetterStore};
use crate::error::{JobError, JobResult};
use crate::job::JobData;
use crate::metrics::MetricsRegistry;
use crate::store::JobStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What happened to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job will run again after `delay`.
    Retried { delay: Duration },
    /// The job exhausted its budget. `record_id` is `None` if the
    /// dead-letter record could not be written.
    DeadLettered { record_id: Option<String> },
    /// The lease expired and the job was recovered before this failure was
    /// reported. Nothing was changed; the current holder decides its fate.
    LeaseLost,
}

impl FailureOutcome {
    /// Returns true for the terminal outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureOutcome::DeadLettered { .. })
    }
}

/// Decides between retry and dead-lettering for every failed attempt.
#[derive(Clone)]
pub struct FailureCoordinator {
    store: Arc<dyn JobStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: MetricsRegistry,
    max_backoff: Duration,
}

impl FailureCoordinator {
    /// Create a coordinator. Retry delays are capped at `max_backoff`.
    pub fn new(
        store: Arc<dyn JobStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: MetricsRegistry,
        max_backoff: Duration,
    ) -> Self {
        Self {
            store,
            dead_letters,
            metrics,
            max_backoff,
        }
    }

    /// Handle a failed attempt.
    ///
    /// `job` must already carry the incremented attempt count and the
    /// `worker_id` it was claimed with. Only job store errors are returned;
    /// a failed dead-letter write is logged and counted.
    pub async fn on_failure(&self, job: &JobData, cause: &JobError) -> JobResult<FailureOutcome> {
        if job.is_exhausted() {
            self.dead_letter(job, cause).await
        } else {
            self.retry(job, cause).await
        }
    }

    async fn retry(&self, job: &JobData, cause: &JobError) -> JobResult<FailureOutcome> {
        let delay = job.backoff.capped_delay(job.attempts_made, self.max_backoff);
        let mut retry = job.clone();
        retry.due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);

        if !self.store.schedule_retry(&retry).await? {
            return Ok(lease_lost(job));
        }
        self.metrics.job_retried(job.queue, &job.job_type);

        warn!(
            job_id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Job failed, scheduling retry"
        );

        Ok(FailureOutcome::Retried { delay })
    }

    async fn dead_letter(&self, job: &JobData, cause: &JobError) -> JobResult<FailureOutcome> {
        if !self.store.remove_failed(job).await? {
            return Ok(lease_lost(job));
        }

        let reason = job.last_error.clone().unwrap_or_else(|| cause.to_string());
        let record = DeadLetterRecord::from_job(job, reason);

        let record_id = match self.dead_letters.insert(&record).await {
            Ok(()) => Some(record.id.clone()),
            Err(e) => {
                error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    job_type = %job.job_type,
                    error = %e,
                    "Failed to persist dead-letter record"
                );
                self.metrics.dead_letter_write_failed(job.queue, &job.job_type);
                None
            }
        };

        self.metrics.terminal_failure(job.queue, &job.job_type);
        if record_id.is_some() {
            self.metrics.dead_lettered(job.queue, &job.job_type);
        }

        info!(
            job_id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            attempts = job.attempts_made,
            record_id = ?record_id,
            "Job moved to dead-letter store"
        );

        Ok(FailureOutcome::DeadLettered { record_id })
    }
}

fn lease_lost(job: &JobData) -> FailureOutcome {
    warn!(
        job_id = %job.id,
        queue = %job.queue,
        attempt = job.attempts_made,
        worker_id = ?job.worker_id,
        "Lease lost before failure was recorded, leaving job to its current holder"
    );
    FailureOutcome::LeaseLost
}
