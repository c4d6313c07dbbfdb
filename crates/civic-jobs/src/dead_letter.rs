//! Dead-letter records and the operator-triggered requeue path.

use crate::error::{JobError, JobResult};
use crate::job::{JobData, JobId, JobOptions, JobType, QueueName};
use crate::producer::{EnqueueRequest, JobProducer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_core::{Page, PageRequest};
use serde::{Deserialize, Serialize};
use shaku::Interface;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Durable snapshot of a job that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// Record ID.
    pub id: String,
    /// ID of the failed job.
    pub job_id: JobId,
    /// Queue the job ran on.
    pub queue: QueueName,
    /// Metric label of the job.
    pub job_type: JobType,
    /// Original handler input.
    pub payload: serde_json::Value,
    /// Error from the last attempt.
    pub failure_reason: String,
    /// Attempts consumed.
    pub attempts_made: u32,
    /// Options the job was enqueued with.
    pub original_opts: JobOptions,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Build a record from a job that just failed terminally.
    pub fn from_job(job: &JobData, failure_reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            queue: job.queue,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            failure_reason: failure_reason.into(),
            attempts_made: job.attempts_made,
            original_opts: job.options(),
            recorded_at: Utc::now(),
        }
    }

    /// Grouping key used by [`DeadLetterStore::counts_by_job_type`].
    pub fn group_key(&self) -> (QueueName, JobType) {
        (self.queue, self.job_type.clone())
    }
}

/// Dead-letter count for one `(queue, jobType)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterGroup {
    pub queue: QueueName,
    pub job_type: JobType,
    pub count: u64,
}

/// Sort groups by count descending, then by queue and job type.
pub(crate) fn sort_groups(groups: &mut [DeadLetterGroup]) {
    groups.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.queue.cmp(&b.queue))
            .then_with(|| a.job_type.cmp(&b.job_type))
    });
}

/// Durable store of dead-letter records.
#[async_trait]
pub trait DeadLetterStore: Interface {
    /// Persist a record.
    async fn insert(&self, record: &DeadLetterRecord) -> JobResult<()>;

    /// Most recent records first.
    async fn list(&self, request: PageRequest) -> JobResult<Page<DeadLetterRecord>>;

    /// Look up a record by ID.
    async fn get(&self, id: &str) -> JobResult<Option<DeadLetterRecord>>;

    /// Delete a record. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> JobResult<bool>;

    /// Total number of records.
    async fn count(&self) -> JobResult<u64>;

    /// Record counts per `(queue, jobType)`, largest first.
    async fn counts_by_job_type(&self) -> JobResult<Vec<DeadLetterGroup>>;
}

/// Moves a dead-letter record back onto its queue as a fresh job.
#[derive(Clone)]
pub struct RequeueOperator {
    dead_letters: Arc<dyn DeadLetterStore>,
    producer: JobProducer,
    options: JobOptions,
}

impl RequeueOperator {
    /// Create an operator that gives requeued jobs `options`.
    pub fn new(
        dead_letters: Arc<dyn DeadLetterStore>,
        producer: JobProducer,
        options: JobOptions,
    ) -> Self {
        Self {
            dead_letters,
            producer,
            options,
        }
    }

    /// Retry budget given to requeued jobs.
    pub fn options(&self) -> JobOptions {
        self.options
    }

    /// Requeue a record and remove it from the store.
    ///
    /// The record is claimed by deleting it first, so concurrent requeues
    /// of the same record produce one job. If the enqueue fails the record
    /// is written back.
    pub async fn requeue(&self, record_id: &str) -> JobResult<JobId> {
        let record = self
            .dead_letters
            .get(record_id)
            .await?
            .ok_or_else(|| JobError::NotFound(record_id.to_string()))?;

        if !self.dead_letters.delete(record_id).await? {
            return Err(JobError::NotFound(record_id.to_string()));
        }

        let request = EnqueueRequest::with_type(record.queue, record.job_type.clone(), record.payload.clone())
            .options(self.options);

        match self.producer.enqueue(request).await {
            Ok(job_id) => {
                info!(
                    record_id = %record_id,
                    old_job_id = %record.job_id,
                    job_id = %job_id,
                    queue = %record.queue,
                    job_type = %record.job_type,
                    "Requeued dead-letter record"
                );
                Ok(job_id)
            }
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "Requeue failed, restoring dead-letter record");
                if let Err(restore_err) = self.dead_letters.insert(&record).await {
                    warn!(record_id = %record_id, error = %restore_err, "Failed to restore dead-letter record");
                }
                Err(e)
            }
        }
    }
}
