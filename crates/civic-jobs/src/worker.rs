//! Worker pool for processing jobs of one queue.

use crate::config::WorkerConfig;
use crate::coordinator::FailureCoordinator;
use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobData, QueueName};
use crate::metrics::MetricsRegistry;
use crate::store::JobStore;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent slots.
    pub concurrency: usize,

    /// Job execution timeout.
    pub job_timeout: Duration,

    /// Polling interval when the queue is empty.
    pub poll_interval: Duration,

    /// Claim lease. Renewed at half this period while a handler runs.
    pub visibility_timeout: Duration,

    /// How often expired leases are swept back to waiting.
    pub stalled_interval: Duration,

    /// Shutdown timeout.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            job_timeout: config.job_timeout(),
            poll_interval: config.poll_interval(),
            visibility_timeout: config.visibility_timeout(),
            stalled_interval: config.stalled_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Processes jobs of one queue.
///
/// Implemented for any `Fn(JobContext) -> impl Future<Output = Result<(), JobError>>`.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one attempt. An error counts as a failed attempt.
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        (self)(ctx).await
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Queue being processed.
    pub queue: QueueName,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Jobs completed.
    pub jobs_processed: u64,

    /// Failed attempts.
    pub jobs_failed: u64,
}

/// Everything a slot task needs, shared between slots.
#[derive(Clone)]
struct Slot {
    queue: QueueName,
    store: Arc<dyn JobStore>,
    coordinator: FailureCoordinator,
    metrics: MetricsRegistry,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(TryRecvError::Empty))
}

impl Slot {
    async fn run(self, worker_id: String, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Worker slot started");

        loop {
            if shutdown_requested(&mut shutdown_rx) {
                break;
            }

            let idle = match self
                .store
                .claim(self.queue, &worker_id, self.config.visibility_timeout)
                .await
            {
                Ok(Some(job)) => {
                    self.process(job, &worker_id).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        debug!("Worker slot stopped");
    }

    async fn process(&self, job: JobData, worker_id: &str) {
        let ctx = job.to_context(worker_id);
        let attempt = ctx.attempt;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let started = Instant::now();
        let result = self.run_handler(&job, ctx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                match self.store.complete(&job).await {
                    Ok(true) => {
                        self.metrics.job_completed(job.queue, &job.job_type, elapsed);
                        debug!(job_id = %job.id, elapsed_ms = elapsed.as_millis() as u64, "Job completed successfully");
                    }
                    Ok(false) => {
                        warn!(job_id = %job.id, attempt, "Job finished after its lease was recovered");
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "Failed to mark job as complete");
                    }
                }
                self.jobs_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(cause) => {
                self.metrics
                    .record_duration(job.queue, &job.job_type, "failed", elapsed);
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);

                let mut job = job;
                job.record_failure(&cause);
                if let Err(e) = self.coordinator.on_failure(&job, &cause).await {
                    error!(
                        job_id = %job.id,
                        attempt,
                        error = %e,
                        "Failed to record job failure"
                    );
                }
            }
        }
    }

    /// Run the handler with a timeout, converting panics into errors and
    /// renewing the lease while it runs.
    async fn run_handler(&self, job: &JobData, ctx: JobContext) -> Result<(), JobError> {
        let job_timeout = self.config.job_timeout;
        let work = timeout(
            job_timeout,
            AssertUnwindSafe(self.handler.handle(ctx)).catch_unwind(),
        );
        tokio::pin!(work);

        let renew_every = (self.config.visibility_timeout / 2).max(Duration::from_millis(10));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = renew.tick() => {
                    if let Err(e) = self.store.extend_lease(job, self.config.visibility_timeout).await {
                        warn!(job_id = %job.id, error = %e, "Failed to extend job lease");
                    }
                }
            }
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(JobError::Handler(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => {
                warn!(job_id = %job.id, timeout_secs = job_timeout.as_secs(), "Job timed out");
                Err(JobError::Timeout(job_timeout.as_secs()))
            }
        }
    }

    async fn sweep(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.stalled_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => match self.store.recover_stalled(self.queue).await {
                    Ok(0) => {}
                    Ok(recovered) => info!(recovered, "Recovered stalled jobs"),
                    Err(e) => warn!(error = %e, "Failed to recover stalled jobs"),
                },
            }
        }
    }
}

/// Fixed-concurrency worker pool for one queue.
pub struct WorkerPool {
    id: String,
    slot: Slot,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        queue: QueueName,
        store: Arc<dyn JobStore>,
        coordinator: FailureCoordinator,
        metrics: MetricsRegistry,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("worker-pool-{}-{}", queue, Uuid::new_v4()),
            slot: Slot {
                queue,
                store,
                coordinator,
                metrics,
                handler,
                config,
                jobs_processed: Arc::new(AtomicU64::new(0)),
                jobs_failed: Arc::new(AtomicU64::new(0)),
            },
            shutdown_tx,
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the slot tasks and the stalled-job sweeper.
    pub fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration(format!(
                "Worker pool for {} already running",
                self.slot.queue
            )));
        }

        let config = &self.slot.config;
        info!(
            pool_id = %self.id,
            queue = %self.slot.queue,
            concurrency = config.concurrency,
            "Starting worker pool"
        );

        let mut tasks = self.tasks.lock();
        for n in 0..config.concurrency {
            let worker_id = format!("{}-{}", self.id, n);
            let span = tracing::info_span!("worker", queue = %self.slot.queue, worker_id = %worker_id);
            let slot = self.slot.clone();
            let rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(slot.run(worker_id, rx).instrument(span)));
        }

        let span = tracing::info_span!("stalled_sweeper", queue = %self.slot.queue);
        let slot = self.slot.clone();
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(slot.sweep(rx).instrument(span)));

        Ok(())
    }

    /// Signal every slot to stop after its current job.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        let _ = self.shutdown_tx.send(());
    }

    /// Stop and wait for in-flight jobs up to the shutdown timeout.
    /// Slots still busy after that are aborted.
    pub async fn shutdown(&self) {
        self.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

        info!(pool_id = %self.id, "Waiting for workers to finish...");
        if timeout(
            self.slot.config.shutdown_timeout,
            futures::future::join_all(tasks),
        )
        .await
        .is_err()
        {
            warn!(pool_id = %self.id, "Shutdown timeout reached, aborting busy workers");
            for abort in aborts {
                abort.abort();
            }
        }

        self.running.store(false, Ordering::SeqCst);

        info!(
            pool_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of jobs completed.
    pub fn jobs_processed(&self) -> u64 {
        self.slot.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get the number of failed attempts.
    pub fn jobs_failed(&self) -> u64 {
        self.slot.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.id.clone(),
            queue: self.slot.queue,
            running: self.is_running(),
            concurrency: self.slot.config.concurrency,
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
        }
    }
}
