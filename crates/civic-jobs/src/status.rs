//! Operational snapshot for the admin surface.

use crate::dead_letter::{DeadLetterGroup, DeadLetterStore};
use crate::job::QueueName;
use crate::metrics::{CounterSample, MetricsRegistry};
use crate::store::{JobStore, QueueCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Overall health reported in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpsStatus {
    /// Every store answered.
    Ok,
    /// At least one store failed; figures may be stale or missing.
    Degraded,
}

/// Dead-letter totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterSummary {
    pub total: u64,
    pub by_job_type: Vec<DeadLetterGroup>,
}

/// Point-in-time view of queues, dead letters and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsSnapshot {
    pub status: OpsStatus,
    pub timestamp: DateTime<Utc>,
    pub queues: BTreeMap<QueueName, QueueCounts>,
    pub dead_letters: DeadLetterSummary,
    /// Totals per counter name across labels.
    pub counters: BTreeMap<String, u64>,
    /// Every labelled counter.
    pub counter_series: Vec<CounterSample>,
    pub uptime_seconds: i64,
}

/// Builds [`OpsSnapshot`]s.
#[derive(Clone)]
pub struct OpsService {
    store: Arc<dyn JobStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: MetricsRegistry,
}

impl OpsService {
    /// Create a service.
    pub fn new(
        store: Arc<dyn JobStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            store,
            dead_letters,
            metrics,
        }
    }

    /// Take a snapshot.
    ///
    /// Queue counts are read live; when the job store fails the last
    /// refreshed gauges are used instead and the status is `degraded`.
    pub async fn snapshot(&self) -> OpsSnapshot {
        let mut status = OpsStatus::Ok;

        let mut queues = BTreeMap::new();
        for queue in QueueName::ALL {
            let counts = match self.store.counts(queue).await {
                Ok(counts) => {
                    self.metrics.set_queue_counts(queue, counts);
                    counts
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Failed to read queue counts");
                    status = OpsStatus::Degraded;
                    self.metrics.queue_counts(queue).unwrap_or_default()
                }
            };
            queues.insert(queue, counts);
        }

        let dead_letters = match self.dead_letter_summary().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Failed to read dead-letter totals");
                status = OpsStatus::Degraded;
                DeadLetterSummary::default()
            }
        };

        let timestamp = Utc::now();
        OpsSnapshot {
            status,
            timestamp,
            queues,
            dead_letters,
            counters: self.metrics.counter_totals(),
            counter_series: self.metrics.counter_samples(),
            uptime_seconds: (timestamp - self.metrics.started_at()).num_seconds(),
        }
    }

    async fn dead_letter_summary(&self) -> crate::error::JobResult<DeadLetterSummary> {
        Ok(DeadLetterSummary {
            total: self.dead_letters.count().await?,
            by_job_type: self.dead_letters.counts_by_job_type().await?,
        })
    }

    /// Check the job store connection.
    pub async fn health_check(&self) -> crate::error::JobResult<()> {
        self.store.health_check().await
    }
}
