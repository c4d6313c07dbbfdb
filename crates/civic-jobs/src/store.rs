//! Job store abstraction shared by the producer, worker pools and the
//! failure coordinator.

use crate::error::JobResult;
use crate::job::{JobData, JobId, QueueName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shaku::Interface;
use std::time::Duration;

/// Per-queue job counts by state.
///
/// An observability projection; not used for any delivery decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Ready to be claimed.
    pub waiting: u64,
    /// Claimed by a worker.
    pub active: u64,
    /// Waiting for a retry delay to elapse.
    pub delayed: u64,
    /// Completed since the store was created.
    pub completed: u64,
    /// Terminally failed since the store was created.
    pub failed: u64,
}

impl QueueCounts {
    /// `(state, count)` pairs in a stable order, for gauge export.
    pub fn by_state(&self) -> [(&'static str, u64); 5] {
        [
            ("waiting", self.waiting),
            ("active", self.active),
            ("delayed", self.delayed),
            ("completed", self.completed),
            ("failed", self.failed),
        ]
    }
}

/// Durable per-queue job storage.
///
/// Implementations must make [`claim`](JobStore::claim) atomic: two
/// concurrent claimers never receive the same job.
#[async_trait]
pub trait JobStore: Interface {
    /// Persist a new job. Jobs due in the future are stored as delayed.
    async fn push(&self, job: &JobData) -> JobResult<()>;

    /// Promote due delayed jobs, then take the oldest waiting job and mark
    /// it active with a lease of `lease` from now.
    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> JobResult<Option<JobData>>;

    /// Push the lease deadline of an active job `lease` into the future.
    async fn extend_lease(&self, job: &JobData, lease: Duration) -> JobResult<()>;

    /// Remove a successfully processed job.
    ///
    /// This and the other finalizing calls only act while `job.worker_id`
    /// still holds the claim. They return `false` and change nothing once
    /// the lease has been recovered, possibly by another worker.
    async fn complete(&self, job: &JobData) -> JobResult<bool>;

    /// Persist a failed job and make it claimable again at `job.due_at`.
    async fn schedule_retry(&self, job: &JobData) -> JobResult<bool>;

    /// Remove a terminally failed job.
    async fn remove_failed(&self, job: &JobData) -> JobResult<bool>;

    /// Move active jobs with an expired lease back to waiting.
    /// Attempt counts are left unchanged. Returns the number recovered.
    async fn recover_stalled(&self, queue: QueueName) -> JobResult<u64>;

    /// Count jobs of a queue by state.
    async fn counts(&self, queue: QueueName) -> JobResult<QueueCounts>;

    /// Look up a job body by id.
    async fn get(&self, id: &JobId) -> JobResult<Option<JobData>>;

    /// Check connectivity to the backing store.
    async fn health_check(&self) -> JobResult<()>;
}
