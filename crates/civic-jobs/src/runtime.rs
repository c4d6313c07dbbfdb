//! Process-scoped container wiring stores, metrics and worker pools.

use crate::config::JobsConfig;
use crate::coordinator::FailureCoordinator;
use crate::dead_letter::{DeadLetterStore, RequeueOperator};
use crate::error::{JobError, JobResult};
use crate::job::QueueName;
use crate::metrics::{register_metrics, MetricsRegistry};
use crate::producer::JobProducer;
use crate::status::OpsService;
use crate::store::JobStore;
use crate::worker::{JobHandler, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Owns the job system of one process.
///
/// Built from injected stores; nothing is global. Register one handler per
/// queue, call [`start`](Self::start), and call [`shutdown`](Self::shutdown)
/// before exit.
pub struct JobRuntime {
    store: Arc<dyn JobStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: MetricsRegistry,
    config: JobsConfig,
    coordinator: FailureCoordinator,
    producer: JobProducer,
    handlers: Mutex<BTreeMap<QueueName, Arc<dyn JobHandler>>>,
    pools: Mutex<Vec<Arc<WorkerPool>>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    started: AtomicBool,
}

impl JobRuntime {
    /// Create a runtime.
    pub fn new(
        store: Arc<dyn JobStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: MetricsRegistry,
        config: JobsConfig,
    ) -> Self {
        let coordinator = FailureCoordinator::new(
            store.clone(),
            dead_letters.clone(),
            metrics.clone(),
            config.max_backoff(),
        );
        let producer = JobProducer::new(store.clone(), metrics.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            dead_letters,
            metrics,
            config,
            coordinator,
            producer,
            handlers: Mutex::new(BTreeMap::new()),
            pools: Mutex::new(Vec::new()),
            refresher: Mutex::new(None),
            shutdown_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Producer handle for submitting jobs.
    pub fn producer(&self) -> JobProducer {
        self.producer.clone()
    }

    /// Operator for moving dead-letter records back onto their queue.
    pub fn requeue_operator(&self) -> RequeueOperator {
        RequeueOperator::new(
            self.dead_letters.clone(),
            self.producer.clone(),
            self.config.dead_letter.requeue_options(),
        )
    }

    /// Read-only view for the admin surface.
    pub fn ops_service(&self) -> OpsService {
        OpsService::new(self.store.clone(), self.dead_letters.clone(), self.metrics.clone())
    }

    /// The shared metrics registry.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The job store.
    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// The dead-letter store.
    pub fn dead_letters(&self) -> Arc<dyn DeadLetterStore> {
        self.dead_letters.clone()
    }

    /// Register the handler of a queue. Each queue takes exactly one.
    pub fn register<H: JobHandler>(&self, queue: QueueName, handler: H) -> JobResult<()> {
        self.register_arc(queue, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&self, queue: QueueName, handler: Arc<dyn JobHandler>) -> JobResult<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(JobError::Configuration(
                "Handlers must be registered before start".to_string(),
            ));
        }

        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&queue) {
            return Err(JobError::Configuration(format!(
                "Handler already registered for queue {}",
                queue
            )));
        }
        handlers.insert(queue, handler);
        info!(queue = %queue, "Registered job handler");
        Ok(())
    }

    /// Spawn one worker pool per registered queue and the metrics refresher.
    pub fn start(&self) -> JobResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Job runtime already started".to_string()));
        }
        register_metrics();

        let handlers = self.handlers.lock().clone();
        let mut pools = self.pools.lock();
        for (queue, handler) in handlers {
            let pool = Arc::new(WorkerPool::new(
                queue,
                self.store.clone(),
                self.coordinator.clone(),
                self.metrics.clone(),
                handler,
                WorkerPoolConfig::from(self.config.worker(queue)),
            ));
            pool.start()?;
            pools.push(pool);
        }

        let refresher = self.metrics.spawn_refresher(
            self.store.clone(),
            self.config.metrics.refresh_interval(),
            self.shutdown_tx.subscribe(),
        );
        *self.refresher.lock() = Some(refresher);

        info!(pools = pools.len(), "Job runtime started");
        Ok(())
    }

    /// Statistics of every running pool.
    pub fn pool_stats(&self) -> Vec<WorkerPoolStats> {
        self.pools.lock().iter().map(|p| p.stats()).collect()
    }

    /// Stop all pools, draining in-flight jobs, and stop the refresher.
    pub async fn shutdown(&self) {
        info!("Shutting down job runtime...");
        let _ = self.shutdown_tx.send(());

        let pools = std::mem::take(&mut *self.pools.lock());
        futures::future::join_all(pools.iter().map(|p| p.shutdown())).await;

        let refresher = self.refresher.lock().take();
        if let Some(refresher) = refresher {
            let _ = refresher.await;
        }
        info!("Job runtime stopped");
    }
}
