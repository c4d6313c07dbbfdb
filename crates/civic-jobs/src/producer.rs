//! Producer API used by request handlers and by other jobs.

use crate::error::JobResult;
use crate::job::{JobData, JobId, JobOptions, JobType, QueueName};
use crate::metrics::MetricsRegistry;
use crate::retry::BackoffPolicy;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::debug;

/// Builder for a job submission.
///
/// ```rust,ignore
/// let request = EnqueueRequest::new(QueueName::Notifications, "report-status-change", payload)
///     .attempts(3)
///     .backoff(BackoffPolicy::fixed(2000));
/// producer.enqueue(request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    queue: QueueName,
    job_type: JobType,
    payload: serde_json::Value,
    options: JobOptions,
}

impl EnqueueRequest {
    /// Create a request with default options. `job_type` is sanitized.
    pub fn new(queue: QueueName, job_type: &str, payload: serde_json::Value) -> Self {
        Self::with_type(queue, JobType::new(job_type), payload)
    }

    /// Create a request with an already validated job type.
    pub fn with_type(queue: QueueName, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            queue,
            job_type,
            payload,
            options: JobOptions::default(),
        }
    }

    /// Create a request without a job type; it is reported as `unknown`.
    pub fn untyped(queue: QueueName, payload: serde_json::Value) -> Self {
        Self::with_type(queue, JobType::unknown(), payload)
    }

    /// Set the retry budget. `0` disables dead-lettering.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.options.attempts = attempts;
        self
    }

    /// Set the backoff policy.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.options.backoff = backoff;
        self
    }

    /// Replace all options.
    pub fn options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Target queue.
    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Build the job data.
    pub fn build(self) -> JobData {
        JobData::new(self.queue, self.job_type, self.payload, self.options)
    }
}

/// Submits jobs to the job store.
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    metrics: MetricsRegistry,
}

impl JobProducer {
    /// Create a producer.
    pub fn new(store: Arc<dyn JobStore>, metrics: MetricsRegistry) -> Self {
        Self { store, metrics }
    }

    /// Submit a job. Fails with `BrokerUnavailable` if the store cannot be
    /// reached; nothing is buffered locally.
    pub async fn enqueue(&self, request: EnqueueRequest) -> JobResult<JobId> {
        let job = request.build();
        self.store.push(&job).await?;
        self.metrics.job_enqueued(job.queue, &job.job_type);

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            attempts = job.max_attempts,
            "Enqueued job"
        );

        Ok(job.id)
    }

    /// Submit a job with explicit options.
    pub async fn enqueue_with_options(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> JobResult<JobId> {
        self.enqueue(EnqueueRequest::new(queue, job_type, payload).options(options))
            .await
    }
}
