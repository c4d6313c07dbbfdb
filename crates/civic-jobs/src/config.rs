//! Job queue configuration.

use crate::error::{JobError, JobResult};
use crate::job::{JobOptions, QueueName};
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Per-queue worker configuration.
    #[serde(default)]
    pub queues: QueuesConfig,

    /// Retry limits.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Dead-letter store configuration.
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// Queue metrics configuration.
    #[serde(default)]
    pub metrics: QueueMetricsConfig,
}

impl JobsConfig {
    /// Worker configuration for a queue.
    pub fn worker(&self, queue: QueueName) -> &WorkerConfig {
        match queue {
            QueueName::ReportProcessing => &self.queues.report_processing,
            QueueName::Notifications => &self.queues.notifications,
        }
    }

    /// Upper bound applied to every computed backoff delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.retry.max_backoff_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> JobResult<()> {
        if self.redis.url.trim().is_empty() {
            return Err(JobError::Configuration("Redis URL must not be empty".to_string()));
        }
        if self.redis.pool_size == 0 {
            return Err(JobError::Configuration("Redis pool size must be at least 1".to_string()));
        }
        for queue in QueueName::ALL {
            self.worker(queue)
                .validate()
                .map_err(|e| JobError::Configuration(format!("{}: {}", queue, e)))?;
        }
        if self.metrics.refresh_interval_secs == 0 {
            return Err(JobError::Configuration(
                "Metrics refresh interval must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "civic:jobs".to_string()
}

/// Worker configuration for each named queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    /// `report-processing` pool.
    #[serde(default = "default_report_worker")]
    pub report_processing: WorkerConfig,

    /// `notifications` pool.
    #[serde(default = "default_notification_worker")]
    pub notifications: WorkerConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            report_processing: default_report_worker(),
            notifications: default_notification_worker(),
        }
    }
}

fn default_report_worker() -> WorkerConfig {
    WorkerConfig::with_concurrency(2)
}

fn default_notification_worker() -> WorkerConfig {
    WorkerConfig::with_concurrency(5)
}

/// Worker pool configuration for a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent slots.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Job execution timeout in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a claimed job stays invisible to other workers.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// How often expired leases are swept back to waiting.
    #[serde(default = "default_stalled_interval")]
    pub stalled_interval_secs: u64,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::with_concurrency(default_concurrency())
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_job_timeout() -> u64 {
    300 // 5 minutes
}

fn default_poll_interval() -> u64 {
    100
}

fn default_visibility_timeout() -> u64 {
    360
}

fn default_stalled_interval() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl WorkerConfig {
    /// Default settings with the given concurrency.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            job_timeout_secs: default_job_timeout(),
            poll_interval_ms: default_poll_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
            stalled_interval_secs: default_stalled_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }

    /// Returns job timeout as Duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the claim lease as Duration.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Returns the stalled sweep interval as Duration.
    pub fn stalled_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_interval_secs)
    }

    /// Returns shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.job_timeout_secs == 0 {
            return Err("job timeout must be at least 1 second".to_string());
        }
        if self.visibility_timeout_secs < self.job_timeout_secs {
            return Err(format!(
                "visibility timeout ({}s) must not be shorter than job timeout ({}s)",
                self.visibility_timeout_secs, self.job_timeout_secs
            ));
        }
        if self.stalled_interval_secs == 0 {
            return Err("stalled interval must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Retry limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delay between attempts in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_backoff() -> u64 {
    3_600_000 // 1 hour
}

/// Dead-letter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Key prefix for dead-letter keys. Independent of the job keys.
    #[serde(default = "default_dead_letter_prefix")]
    pub key_prefix: String,

    /// Retry budget given to requeued jobs.
    #[serde(default = "default_requeue_attempts")]
    pub requeue_attempts: u32,

    /// Backoff given to requeued jobs.
    #[serde(default = "default_requeue_backoff")]
    pub requeue_backoff: BackoffPolicy,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_dead_letter_prefix(),
            requeue_attempts: default_requeue_attempts(),
            requeue_backoff: default_requeue_backoff(),
        }
    }
}

impl DeadLetterConfig {
    /// Options applied to jobs created by a requeue.
    pub fn requeue_options(&self) -> JobOptions {
        JobOptions::new(self.requeue_attempts, self.requeue_backoff)
    }
}

fn default_dead_letter_prefix() -> String {
    "civic:dlq".to_string()
}

fn default_requeue_attempts() -> u32 {
    3
}

fn default_requeue_backoff() -> BackoffPolicy {
    BackoffPolicy::exponential(3000)
}

/// Queue metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricsConfig {
    /// Gauge refresh interval in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for QueueMetricsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl QueueMetricsConfig {
    /// Returns the refresh interval as Duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn default_refresh_interval() -> u64 {
    10
}
