//! Shared fixtures for job system integration tests.

#![allow(dead_code)]

use civic_jobs::config::RedisConfig;
use civic_jobs::{
    create_pool, FailureCoordinator, InMemoryDeadLetterStore, InMemoryJobStore, JobData, JobError,
    JobHandler, JobProducer, JobStore, MetricsRegistry, QueueName, RedisDeadLetterStore,
    RedisJobStore, WorkerPool, WorkerPoolConfig,
};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

pub const LEASE: Duration = Duration::from_secs(300);

/// In-memory job system with every component wired together.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub dead_letters: Arc<InMemoryDeadLetterStore>,
    pub metrics: MetricsRegistry,
    pub producer: JobProducer,
    pub coordinator: FailureCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let metrics = MetricsRegistry::new();
        Self {
            producer: JobProducer::new(store.clone(), metrics.clone()),
            coordinator: FailureCoordinator::new(
                store.clone(),
                dead_letters.clone(),
                metrics.clone(),
                Duration::from_secs(3600),
            ),
            store,
            dead_letters,
            metrics,
        }
    }

    /// Claim the next job of `queue`, moving the store clock forward by
    /// `wait` first.
    pub async fn claim_after(&self, queue: QueueName, wait: Duration) -> Option<JobData> {
        self.store.advance_clock(wait);
        self.store
            .claim(queue, "test-worker", LEASE)
            .await
            .expect("claim failed")
    }

    /// Fail a claimed job the way a worker slot does.
    pub async fn fail(&self, mut job: JobData, reason: &str) -> civic_jobs::FailureOutcome {
        let err = JobError::handler(reason);
        job.record_failure(&err);
        self.coordinator
            .on_failure(&job, &err)
            .await
            .expect("failure handling failed")
    }

    /// A worker pool for `queue` running `handler` with short intervals.
    pub fn pool(&self, queue: QueueName, handler: Arc<dyn JobHandler>, concurrency: usize) -> WorkerPool {
        WorkerPool::new(
            queue,
            self.store.clone(),
            self.coordinator.clone(),
            self.metrics.clone(),
            handler,
            WorkerPoolConfig {
                concurrency,
                job_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(5),
                visibility_timeout: Duration::from_secs(10),
                stalled_interval: Duration::from_secs(1),
                shutdown_timeout: Duration::from_secs(5),
            },
        )
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Redis container wrapper for tests of the Redis-backed stores.
///
/// Requires Docker to be available on the system.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    pub jobs: Arc<RedisJobStore>,
    pub dead_letters: Arc<RedisDeadLetterStore>,
}

impl TestRedis {
    /// Starts a fresh Redis container and connects both stores to it.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");
        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: format!("redis://127.0.0.1:{}", port),
            pool_size: 8,
            key_prefix: "test:jobs".to_string(),
        };
        let pool = create_pool(&config)
            .await
            .expect("Failed to connect to Redis");

        Self {
            _container: container,
            jobs: Arc::new(RedisJobStore::new(pool.clone(), config.key_prefix)),
            dead_letters: Arc::new(RedisDeadLetterStore::new(pool, "test:dlq")),
        }
    }
}
