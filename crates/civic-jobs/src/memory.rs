//! In-process job and dead-letter stores.
//!
//! Same semantics as the Redis stores, for tests and single-process
//! development. Both can be switched into an unavailable mode where every
//! call fails with `BrokerUnavailable`.

use crate::dead_letter::{sort_groups, DeadLetterGroup, DeadLetterRecord, DeadLetterStore};
use crate::error::{JobError, JobResult};
use crate::job::{JobData, JobId, JobState, JobType, QueueName};
use crate::store::{JobStore, QueueCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_core::{Page, PageRequest};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[derive(Default)]
struct QueueState {
    /// Front is the next job to claim.
    waiting: VecDeque<JobId>,
    /// Ordered by due time, then insertion.
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
    /// Job ID to lease deadline.
    active: HashMap<JobId, DateTime<Utc>>,
    completed: u64,
    failed: u64,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, JobData>,
    queues: HashMap<QueueName, QueueState>,
    seq: u64,
}

impl StoreInner {
    fn queue(&mut self, queue: QueueName) -> &mut QueueState {
        self.queues.entry(queue).or_default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn promote_due(&mut self, queue: QueueName, now: DateTime<Utc>) {
        let Self { jobs, queues, .. } = self;
        let state = queues.entry(queue).or_default();

        while let Some(entry) = state.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(job) = jobs.get_mut(&id) {
                job.state = JobState::Waiting;
            }
            state.waiting.push_back(id);
        }
    }

    /// Returns true while `job` is active and claimed by `job.worker_id`.
    fn holds(&self, job: &JobData) -> bool {
        let active = self
            .queues
            .get(&job.queue)
            .is_some_and(|state| state.active.contains_key(&job.id));
        let owner = self.jobs.get(&job.id).and_then(|stored| stored.worker_id.as_deref());
        active && owner.is_some() && owner == job.worker_id.as_deref()
    }
}

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<StoreInner>,
    skew_ms: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move this store's clock forward. Delays and leases are evaluated
    /// against the shifted clock.
    pub fn advance_clock(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.skew_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Make every call fail with `BrokerUnavailable` while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current time on this store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.skew_ms.load(Ordering::SeqCst))
    }

    fn ensure_available(&self) -> JobResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobError::BrokerUnavailable("job store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn push(&self, job: &JobData) -> JobResult<()> {
        self.ensure_available()?;
        let now = self.now();
        let mut inner = self.inner.lock();
        let mut job = job.clone();

        if job.due_at > now {
            job.state = JobState::RetryDelayed;
            let seq = inner.next_seq();
            inner.queue(job.queue).delayed.insert((job.due_at, seq), job.id.clone());
        } else {
            job.state = JobState::Waiting;
            inner.queue(job.queue).waiting.push_back(job.id.clone());
        }
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> JobResult<Option<JobData>> {
        self.ensure_available()?;
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.promote_due(queue, now);

        while let Some(id) = inner.queue(queue).waiting.pop_front() {
            let lease_until = now + to_chrono(lease);
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            job.activate(worker_id, lease_until);
            let job = job.clone();
            inner.queue(queue).active.insert(id, lease_until);
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn extend_lease(&self, job: &JobData, lease: Duration) -> JobResult<()> {
        self.ensure_available()?;
        let lease_until = self.now() + to_chrono(lease);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(deadline) = inner
            .queues
            .get_mut(&job.queue)
            .and_then(|state| state.active.get_mut(&job.id))
        {
            *deadline = lease_until;
            if let Some(stored) = inner.jobs.get_mut(&job.id) {
                stored.lease_until = Some(lease_until);
            }
        }
        Ok(())
    }

    async fn complete(&self, job: &JobData) -> JobResult<bool> {
        self.ensure_available()?;
        let mut inner = self.inner.lock();
        if !inner.holds(job) {
            return Ok(false);
        }
        inner.jobs.remove(&job.id);
        let state = inner.queue(job.queue);
        state.active.remove(&job.id);
        state.completed += 1;
        Ok(true)
    }

    async fn schedule_retry(&self, job: &JobData) -> JobResult<bool> {
        self.ensure_available()?;
        let mut inner = self.inner.lock();
        if !inner.holds(job) {
            return Ok(false);
        }
        let mut job = job.clone();
        job.delay_until(job.due_at);

        let seq = inner.next_seq();
        let state = inner.queue(job.queue);
        state.active.remove(&job.id);
        state.delayed.insert((job.due_at, seq), job.id.clone());
        inner.jobs.insert(job.id.clone(), job);
        Ok(true)
    }

    async fn remove_failed(&self, job: &JobData) -> JobResult<bool> {
        self.ensure_available()?;
        let mut inner = self.inner.lock();
        if !inner.holds(job) {
            return Ok(false);
        }
        inner.jobs.remove(&job.id);
        let state = inner.queue(job.queue);
        state.active.remove(&job.id);
        state.failed += 1;
        Ok(true)
    }

    async fn recover_stalled(&self, queue: QueueName) -> JobResult<u64> {
        self.ensure_available()?;
        let now = self.now();
        let mut inner = self.inner.lock();

        let state = inner.queue(queue);
        let mut stalled: Vec<(JobId, DateTime<Utc>)> = state
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (id.clone(), *deadline))
            .collect();
        // Oldest lease ends up at the very front.
        stalled.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _) in &stalled {
            state.active.remove(id);
            state.waiting.push_front(id.clone());
        }
        for (id, _) in &stalled {
            if let Some(job) = inner.jobs.get_mut(id) {
                job.release();
            }
        }
        Ok(stalled.len() as u64)
    }

    async fn counts(&self, queue: QueueName) -> JobResult<QueueCounts> {
        self.ensure_available()?;
        let mut inner = self.inner.lock();
        let state = inner.queue(queue);
        Ok(QueueCounts {
            waiting: state.waiting.len() as u64,
            active: state.active.len() as u64,
            delayed: state.delayed.len() as u64,
            completed: state.completed,
            failed: state.failed,
        })
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobData>> {
        self.ensure_available()?;
        Ok(self.inner.lock().jobs.get(id).cloned())
    }

    async fn health_check(&self) -> JobResult<()> {
        self.ensure_available()
    }
}

#[derive(Default)]
struct DeadLetterInner {
    records: HashMap<String, (u64, DeadLetterRecord)>,
    seq: u64,
}

/// In-memory [`DeadLetterStore`].
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    inner: Mutex<DeadLetterInner>,
    unavailable: AtomicBool,
}

impl InMemoryDeadLetterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `BrokerUnavailable` while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> JobResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobError::BrokerUnavailable(
                "dead-letter store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, record: &DeadLetterRecord) -> JobResult<()> {
        self.ensure_available()?;
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner.records.insert(record.id.clone(), (seq, record.clone()));
        Ok(())
    }

    async fn list(&self, request: PageRequest) -> JobResult<Page<DeadLetterRecord>> {
        self.ensure_available()?;
        let mut all: Vec<(u64, DeadLetterRecord)> =
            self.inner.lock().records.values().cloned().collect();
        all.sort_by(|(seq_a, a), (seq_b, b)| {
            b.recorded_at.cmp(&a.recorded_at).then_with(|| seq_b.cmp(seq_a))
        });
        let ordered = all.into_iter().map(|(_, record)| record).collect();
        Ok(Page::from_ordered(ordered, request))
    }

    async fn get(&self, id: &str) -> JobResult<Option<DeadLetterRecord>> {
        self.ensure_available()?;
        Ok(self.inner.lock().records.get(id).map(|(_, r)| r.clone()))
    }

    async fn delete(&self, id: &str) -> JobResult<bool> {
        self.ensure_available()?;
        Ok(self.inner.lock().records.remove(id).is_some())
    }

    async fn count(&self) -> JobResult<u64> {
        self.ensure_available()?;
        Ok(self.inner.lock().records.len() as u64)
    }

    async fn counts_by_job_type(&self) -> JobResult<Vec<DeadLetterGroup>> {
        self.ensure_available()?;
        let mut counts: HashMap<(QueueName, JobType), u64> = HashMap::new();
        for (_, record) in self.inner.lock().records.values() {
            *counts.entry(record.group_key()).or_insert(0) += 1;
        }

        let mut groups: Vec<_> = counts
            .into_iter()
            .map(|((queue, job_type), count)| DeadLetterGroup {
                queue,
                job_type,
                count,
            })
            .collect();
        sort_groups(&mut groups);
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use crate::retry::BackoffPolicy;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    fn job(queue: QueueName, n: u32) -> JobData {
        JobData::new(
            queue,
            JobType::new("image-analysis"),
            json!({ "n": n }),
            JobOptions::new(3, BackoffPolicy::fixed(1000)),
        )
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let store = InMemoryJobStore::new();
        let first = job(QueueName::ReportProcessing, 1);
        let second = job(QueueName::ReportProcessing, 2);
        store.push(&first).await.unwrap();
        store.push(&second).await.unwrap();

        let claimed = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.worker_id.as_deref(), Some("w"));

        let claimed = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let store = InMemoryJobStore::new();
        store.push(&job(QueueName::Notifications, 1)).await.unwrap();
        assert!(store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().is_none());
        assert!(store.claim(QueueName::Notifications, "w", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_waits_for_due_time() {
        let store = InMemoryJobStore::new();
        let pushed = job(QueueName::ReportProcessing, 1);
        store.push(&pushed).await.unwrap();
        let mut claimed = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();

        claimed.due_at = store.now() + chrono::Duration::seconds(5);
        assert!(store.schedule_retry(&claimed).await.unwrap());

        let counts = store.counts(QueueName::ReportProcessing).await.unwrap();
        assert_eq!((counts.active, counts.delayed), (0, 1));
        assert!(store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().is_none());

        store.advance_clock(Duration::from_secs(6));
        let again = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();
        assert_eq!(again.id, pushed.id);
    }

    #[tokio::test]
    async fn test_complete_and_remove_failed_update_counts() {
        let store = InMemoryJobStore::new();
        store.push(&job(QueueName::Notifications, 1)).await.unwrap();
        store.push(&job(QueueName::Notifications, 2)).await.unwrap();

        let a = store.claim(QueueName::Notifications, "w", LEASE).await.unwrap().unwrap();
        let b = store.claim(QueueName::Notifications, "w", LEASE).await.unwrap().unwrap();
        assert!(store.complete(&a).await.unwrap());
        assert!(store.remove_failed(&b).await.unwrap());

        let counts = store.counts(QueueName::Notifications).await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.active, 0);
        assert!(store.get(&a.id).await.unwrap().is_none());
        assert!(store.get(&b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_stalled_goes_to_head() {
        let store = InMemoryJobStore::new();
        let stalled = job(QueueName::ReportProcessing, 1);
        let queued = job(QueueName::ReportProcessing, 2);
        store.push(&stalled).await.unwrap();
        store.claim(QueueName::ReportProcessing, "dead-worker", LEASE).await.unwrap();
        store.push(&queued).await.unwrap();

        assert_eq!(store.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 0);
        store.advance_clock(LEASE + Duration::from_secs(1));
        assert_eq!(store.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 1);

        let next = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();
        assert_eq!(next.id, stalled.id);
        assert_eq!(next.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_finalizing_requires_current_claim() {
        let store = InMemoryJobStore::new();
        store.push(&job(QueueName::ReportProcessing, 1)).await.unwrap();
        let late = store.claim(QueueName::ReportProcessing, "worker-a", LEASE).await.unwrap().unwrap();

        store.advance_clock(LEASE + Duration::from_secs(1));
        store.recover_stalled(QueueName::ReportProcessing).await.unwrap();
        let current = store.claim(QueueName::ReportProcessing, "worker-b", LEASE).await.unwrap().unwrap();

        assert!(!store.complete(&late).await.unwrap());
        assert!(!store.remove_failed(&late).await.unwrap());
        let mut retry = late.clone();
        retry.due_at = store.now() + chrono::Duration::seconds(5);
        assert!(!store.schedule_retry(&retry).await.unwrap());

        let counts = store.counts(QueueName::ReportProcessing).await.unwrap();
        assert_eq!((counts.active, counts.delayed, counts.completed, counts.failed), (1, 0, 0, 0));

        assert!(store.complete(&current).await.unwrap());
        assert!(!store.complete(&current).await.unwrap());
        assert_eq!(store.counts(QueueName::ReportProcessing).await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_unclaimed_job_cannot_be_finalized() {
        let store = InMemoryJobStore::new();
        let pending = job(QueueName::Notifications, 1);
        store.push(&pending).await.unwrap();

        assert!(!store.remove_failed(&pending).await.unwrap());
        assert_eq!(store.counts(QueueName::Notifications).await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_extend_lease_prevents_recovery() {
        let store = InMemoryJobStore::new();
        store.push(&job(QueueName::ReportProcessing, 1)).await.unwrap();
        let claimed = store.claim(QueueName::ReportProcessing, "w", LEASE).await.unwrap().unwrap();

        store.advance_clock(Duration::from_secs(50));
        store.extend_lease(&claimed, LEASE).await.unwrap();
        store.advance_clock(Duration::from_secs(50));

        assert_eq!(store.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryJobStore::new();
        store.set_unavailable(true);
        let err = store.push(&job(QueueName::Notifications, 1)).await.unwrap_err();
        assert!(err.is_broker_unavailable());
        assert!(store.health_check().await.is_err());

        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }

    fn record(job_type: &str, offset_secs: i64) -> DeadLetterRecord {
        let mut job = job(QueueName::ReportProcessing, 0);
        job.job_type = JobType::new(job_type);
        let mut record = DeadLetterRecord::from_job(&job, "boom");
        record.recorded_at = Utc::now() + chrono::Duration::seconds(offset_secs);
        record
    }

    #[tokio::test]
    async fn test_dead_letter_list_most_recent_first() {
        let store = InMemoryDeadLetterStore::new();
        let old = record("image-analysis", -10);
        let new = record("image-analysis", 0);
        store.insert(&old).await.unwrap();
        store.insert(&new).await.unwrap();

        let page = store.list(PageRequest::first()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, new.id);
        assert_eq!(page.items[1].id, old.id);

        let second = store.list(PageRequest::new(1, 1)).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, old.id);
    }

    #[tokio::test]
    async fn test_dead_letter_delete() {
        let store = InMemoryDeadLetterStore::new();
        let r = record("image-analysis", 0);
        store.insert(&r).await.unwrap();

        assert!(store.delete(&r.id).await.unwrap());
        assert!(!store.delete(&r.id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_groups() {
        let store = InMemoryDeadLetterStore::new();
        store.insert(&record("image-analysis", 0)).await.unwrap();
        store.insert(&record("image-analysis", 1)).await.unwrap();
        store.insert(&record("reroute", 2)).await.unwrap();

        let groups = store.counts_by_job_type().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].job_type.as_str(), "image-analysis");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[1].count, 1);
    }
}
