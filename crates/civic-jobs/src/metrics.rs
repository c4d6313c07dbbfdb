//! Queue metrics.
//!
//! [`MetricsRegistry`] keeps its own counters and gauges so the ops snapshot
//! can be rendered without a global recorder, and forwards every update to
//! the `metrics` facade so an installed Prometheus recorder exports them too.

use crate::error::JobResult;
use crate::job::{JobType, QueueName};
use crate::store::{JobStore, QueueCounts};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Metric names.
pub mod names {
    /// Terminal failures on the report-processing queue.
    pub const REPORT_PROCESSING_FAILED_TOTAL: &str = "bull_report_processing_failed_total";
    /// Terminal failures on the notifications queue.
    pub const NOTIFICATION_FAILED_TOTAL: &str = "bull_notification_failed_total";
    /// Dead-letter records persisted.
    pub const DEAD_LETTER_TOTAL: &str = "civic_dead_letter_total";
    /// Dead-letter records that could not be persisted.
    pub const DEAD_LETTER_WRITE_ERRORS_TOTAL: &str = "civic_dead_letter_write_errors_total";
    /// Jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "civic_jobs_enqueued_total";
    /// Jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "civic_jobs_completed_total";
    /// Failed attempts scheduled for retry.
    pub const JOBS_RETRIED_TOTAL: &str = "civic_jobs_retried_total";

    /// Report-processing jobs by state.
    pub const REPORT_QUEUE_JOBS: &str = "report_queue_jobs";
    /// Notification jobs by state.
    pub const NOTIFICATION_QUEUE_JOBS: &str = "notification_queue_jobs";

    /// Handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "civic_job_duration_seconds";

    use crate::job::QueueName;

    /// Terminal-failure counter for a queue.
    pub const fn failed_total(queue: QueueName) -> &'static str {
        match queue {
            QueueName::ReportProcessing => REPORT_PROCESSING_FAILED_TOTAL,
            QueueName::Notifications => NOTIFICATION_FAILED_TOTAL,
        }
    }

    /// Per-state gauge for a queue.
    pub const fn queue_jobs(queue: QueueName) -> &'static str {
        match queue {
            QueueName::ReportProcessing => REPORT_QUEUE_JOBS,
            QueueName::Notifications => NOTIFICATION_QUEUE_JOBS,
        }
    }
}

/// Register all metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(
        names::REPORT_PROCESSING_FAILED_TOTAL,
        "Report-processing jobs that exhausted their retry budget"
    );
    describe_counter!(
        names::NOTIFICATION_FAILED_TOTAL,
        "Notification jobs that exhausted their retry budget"
    );
    describe_counter!(names::DEAD_LETTER_TOTAL, "Dead-letter records persisted");
    describe_counter!(
        names::DEAD_LETTER_WRITE_ERRORS_TOTAL,
        "Dead-letter records that could not be persisted"
    );
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");

    describe_gauge!(names::REPORT_QUEUE_JOBS, "Report-processing jobs by state");
    describe_gauge!(names::NOTIFICATION_QUEUE_JOBS, "Notification jobs by state");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job handler execution duration in seconds"
    );
}

type CounterKey = (&'static str, QueueName, JobType);

/// One labelled counter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSample {
    /// Metric name.
    pub name: String,
    /// Queue label.
    pub queue: QueueName,
    /// Job type label.
    pub job_type: JobType,
    /// Current value.
    pub value: u64,
}

struct RegistryInner {
    counters: RwLock<HashMap<CounterKey, AtomicU64>>,
    gauges: RwLock<HashMap<QueueName, QueueCounts>>,
    started_at: DateTime<Utc>,
}

/// Process-local counters and gauges for the job system.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                counters: RwLock::new(HashMap::new()),
                gauges: RwLock::new(HashMap::new()),
                started_at: Utc::now(),
            }),
        }
    }

    /// When the registry was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    fn increment(&self, name: &'static str, queue: QueueName, job_type: &JobType) {
        let key = (name, queue, job_type.clone());

        let found = {
            let counters = self.inner.counters.read();
            match counters.get(&key) {
                Some(value) => {
                    value.fetch_add(1, Ordering::Relaxed);
                    true
                }
                None => false,
            }
        };
        if !found {
            self.inner
                .counters
                .write()
                .entry(key)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }

        counter!(
            name,
            "queue" => queue.as_str(),
            "jobType" => job_type.to_string()
        )
        .increment(1);
    }

    /// A job exhausted its retry budget.
    pub fn terminal_failure(&self, queue: QueueName, job_type: &JobType) {
        self.increment(names::failed_total(queue), queue, job_type);
    }

    /// A dead-letter record was persisted.
    pub fn dead_lettered(&self, queue: QueueName, job_type: &JobType) {
        self.increment(names::DEAD_LETTER_TOTAL, queue, job_type);
    }

    /// A dead-letter record could not be persisted.
    pub fn dead_letter_write_failed(&self, queue: QueueName, job_type: &JobType) {
        self.increment(names::DEAD_LETTER_WRITE_ERRORS_TOTAL, queue, job_type);
    }

    /// A job was enqueued.
    pub fn job_enqueued(&self, queue: QueueName, job_type: &JobType) {
        self.increment(names::JOBS_ENQUEUED_TOTAL, queue, job_type);
    }

    /// A job completed successfully.
    pub fn job_completed(&self, queue: QueueName, job_type: &JobType, duration: Duration) {
        self.increment(names::JOBS_COMPLETED_TOTAL, queue, job_type);
        self.record_duration(queue, job_type, "completed", duration);
    }

    /// A failed attempt was scheduled for retry.
    pub fn job_retried(&self, queue: QueueName, job_type: &JobType) {
        self.increment(names::JOBS_RETRIED_TOTAL, queue, job_type);
    }

    /// Record how long a handler ran.
    pub fn record_duration(
        &self,
        queue: QueueName,
        job_type: &JobType,
        status: &'static str,
        duration: Duration,
    ) {
        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.as_str(),
            "jobType" => job_type.to_string(),
            "status" => status
        )
        .record(duration.as_secs_f64());
    }

    /// Current value of one labelled counter.
    pub fn counter_value(&self, name: &str, queue: QueueName, job_type: &JobType) -> u64 {
        self.inner
            .counters
            .read()
            .iter()
            .find(|((n, q, t), _)| *n == name && *q == queue && t == job_type)
            .map_or(0, |(_, v)| v.load(Ordering::Relaxed))
    }

    /// Totals per metric name across all labels.
    pub fn counter_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for ((name, _, _), value) in self.inner.counters.read().iter() {
            *totals.entry((*name).to_string()).or_insert(0) += value.load(Ordering::Relaxed);
        }
        totals
    }

    /// Every labelled counter, sorted by name then labels.
    pub fn counter_samples(&self) -> Vec<CounterSample> {
        let mut samples: Vec<_> = self
            .inner
            .counters
            .read()
            .iter()
            .map(|((name, queue, job_type), value)| CounterSample {
                name: (*name).to_string(),
                queue: *queue,
                job_type: job_type.clone(),
                value: value.load(Ordering::Relaxed),
            })
            .collect();
        samples.sort_by(|a, b| {
            (&a.name, a.queue, &a.job_type).cmp(&(&b.name, b.queue, &b.job_type))
        });
        samples
    }

    /// Overwrite the state gauges of a queue.
    pub fn set_queue_counts(&self, queue: QueueName, counts: QueueCounts) {
        self.inner.gauges.write().insert(queue, counts);

        let name = names::queue_jobs(queue);
        for (state, value) in counts.by_state() {
            gauge!(name, "state" => state).set(value as f64);
        }
    }

    /// Last refreshed counts of a queue.
    pub fn queue_counts(&self, queue: QueueName) -> Option<QueueCounts> {
        self.inner.gauges.read().get(&queue).copied()
    }

    /// Read counts for every queue from the store and update the gauges.
    pub async fn refresh_once(&self, store: &dyn JobStore) -> JobResult<()> {
        for queue in QueueName::ALL {
            let counts = store.counts(queue).await?;
            self.set_queue_counts(queue, counts);
        }
        Ok(())
    }

    /// Refresh gauges every `interval` until a shutdown signal arrives.
    ///
    /// Failures are logged and retried on the next tick.
    pub fn spawn_refresher(
        &self,
        store: Arc<dyn JobStore>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("Queue metrics refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = registry.refresh_once(store.as_ref()).await {
                            warn!(error = %e, "Failed to refresh queue metrics");
                        }
                    }
                }
            }
        })
    }
}
