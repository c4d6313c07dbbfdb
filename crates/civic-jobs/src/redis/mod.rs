//! Redis-backed job and dead-letter stores.

mod dead_letter;
mod queue;

pub use dead_letter::RedisDeadLetterStore;
pub use queue::RedisJobStore;

use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::job::QueueName;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool and verify it with `PING`.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for job queue...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Key builder for the job store.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Waiting job IDs (list; LPUSH to enqueue, RPOP to claim).
    pub fn wait(&self, queue: QueueName) -> String {
        format!("{}:{}:wait", self.prefix, queue)
    }

    /// Delayed job IDs (sorted set by due time in ms).
    pub fn delayed(&self, queue: QueueName) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    /// Active job IDs (sorted set by lease deadline in ms).
    pub fn active(&self, queue: QueueName) -> String {
        format!("{}:{}:active", self.prefix, queue)
    }

    /// Claim holders (hash: job id -> worker id).
    pub fn owners(&self, queue: QueueName) -> String {
        format!("{}:{}:owners", self.prefix, queue)
    }

    /// Completed counter.
    pub fn completed(&self, queue: QueueName) -> String {
        format!("{}:{}:completed", self.prefix, queue)
    }

    /// Terminal failure counter.
    pub fn failed(&self, queue: QueueName) -> String {
        format!("{}:{}:failed", self.prefix, queue)
    }

    /// Job body (JSON string).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("civic:jobs")
    }
}

/// Key builder for the dead-letter store.
#[derive(Debug, Clone)]
pub struct DeadLetterKeys {
    prefix: String,
}

impl DeadLetterKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Record bodies (hash: record id -> JSON).
    pub fn records(&self) -> String {
        format!("{}:records", self.prefix)
    }

    /// Record IDs (sorted set by recorded time in ms).
    pub fn index(&self) -> String {
        format!("{}:index", self.prefix)
    }

    /// Counts per group (hash: "queue|jobType" -> count).
    pub fn by_type(&self) -> String {
        format!("{}:by-type", self.prefix)
    }

    /// Hash field for a `(queue, jobType)` group.
    pub fn group_field(queue: QueueName, job_type: &str) -> String {
        format!("{}|{}", queue, job_type)
    }
}

impl Default for DeadLetterKeys {
    fn default() -> Self {
        Self::new("civic:dlq")
    }
}
