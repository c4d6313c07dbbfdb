//! Civic Jobs - durable job queue for deferred report work
//!
//! A Redis-backed job queue with:
//! - Two named queues (`report-processing`, `notifications`)
//! - Fixed-concurrency worker pools with timeouts and lease recovery
//! - Fixed or exponential backoff between attempts
//! - A durable dead-letter store with operator-triggered requeue
//! - Labelled counters and per-queue gauges exported through `metrics`
//!
//! # Architecture
//!
//! ```text
//!  JobProducer ──push──▶ JobStore ◀──claim── WorkerPool ──▶ JobHandler
//!                          ▲                     │
//!                          │ schedule_retry      │ error / timeout
//!                          │                     ▼
//!                          └───────────── FailureCoordinator
//!                                                │ budget exhausted
//!                                                ▼
//!   RequeueOperator ◀──────────────────── DeadLetterStore
//!         │                               MetricsRegistry
//!         └──enqueue──▶ JobProducer
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use civic_jobs::{EnqueueRequest, JobContext, JobRuntime, QueueName, BackoffPolicy};
//!
//! let runtime = JobRuntime::new(store, dead_letters, MetricsRegistry::new(), config.jobs);
//! runtime.register(QueueName::Notifications, |ctx: JobContext| async move {
//!     send_email(ctx.payload_as()?).await
//! })?;
//! runtime.start()?;
//!
//! runtime
//!     .producer()
//!     .enqueue(
//!         EnqueueRequest::new(QueueName::Notifications, "report-status-change", payload)
//!             .attempts(3)
//!             .backoff(BackoffPolicy::fixed(2000)),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod dead_letter;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod producer;
pub mod redis;
pub mod retry;
pub mod runtime;
pub mod status;
pub mod store;
pub mod worker;

pub use config::{JobsConfig, WorkerConfig};
pub use coordinator::{FailureCoordinator, FailureOutcome};
pub use dead_letter::{DeadLetterGroup, DeadLetterRecord, DeadLetterStore, RequeueOperator};
pub use error::{JobError, JobResult};
pub use job::{JobContext, JobData, JobId, JobOptions, JobState, JobType, QueueName};
pub use memory::{InMemoryDeadLetterStore, InMemoryJobStore};
pub use self::metrics::{register_metrics, MetricsRegistry};
pub use producer::{EnqueueRequest, JobProducer};
pub use self::redis::{create_pool, RedisDeadLetterStore, RedisJobStore};
pub use retry::{BackoffKind, BackoffPolicy};
pub use runtime::JobRuntime;
pub use status::{OpsService, OpsSnapshot, OpsStatus};
pub use store::{JobStore, QueueCounts};
pub use worker::{JobHandler, WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::dead_letter::DeadLetterStore;
    pub use crate::store::JobStore;
    pub use crate::worker::JobHandler;
    pub use crate::{JobContext, JobError, JobId, JobResult, QueueName};
}
