//! Worker pools and the job runtime running against a shared in-memory store.

mod common;

use civic_jobs::metrics::names;
use civic_jobs::{
    BackoffPolicy, DeadLetterStore, EnqueueRequest, InMemoryDeadLetterStore, InMemoryJobStore,
    JobContext, JobError, JobHandler, JobRuntime, JobStore, JobsConfig, MetricsRegistry,
    QueueName,
};
use common::{eventually, Harness};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_two_pools_never_run_the_same_job_twice() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handler: Arc<dyn JobHandler> = {
        let calls = calls.clone();
        Arc::new(move |_ctx: JobContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), JobError>(())
            }
        })
    };

    let first = h.pool(QueueName::Notifications, handler.clone(), 3);
    let second = h.pool(QueueName::Notifications, handler, 3);
    first.start().unwrap();
    second.start().unwrap();

    h.producer
        .enqueue(EnqueueRequest::new(
            QueueName::Notifications,
            "report-status-change",
            json!({"reportId": "r-1", "status": "resolved"}),
        ))
        .await
        .unwrap();

    eventually(|| first.jobs_processed() + second.jobs_processed() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let counts = h.store.counts(QueueName::Notifications).await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.waiting + counts.active + counts.delayed, 0);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_pool_dead_letters_after_budget() {
    let h = Harness::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let handler: Arc<dyn JobHandler> = {
        let seen = seen.clone();
        Arc::new(move |ctx: JobContext| {
            let seen = seen.clone();
            async move {
                seen.lock().push((ctx.attempt, ctx.is_last_attempt()));
                Err::<(), JobError>(JobError::handler("smtp refused"))
            }
        })
    };

    let pool = h.pool(QueueName::Notifications, handler, 1);
    pool.start().unwrap();

    h.producer
        .enqueue(
            EnqueueRequest::new(QueueName::Notifications, "report-status-change", json!({}))
                .attempts(2)
                .backoff(BackoffPolicy::fixed(1)),
        )
        .await
        .unwrap();

    eventually(|| pool.jobs_failed() == 2).await;
    pool.shutdown().await;

    assert_eq!(*seen.lock(), vec![(1, false), (2, true)]);
    assert_eq!(h.dead_letters.count().await.unwrap(), 1);
    assert_eq!(h.metrics.counter_totals()[names::NOTIFICATION_FAILED_TOTAL], 1);
}

#[tokio::test]
async fn test_runtime_processes_both_queues() {
    let store = Arc::new(InMemoryJobStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let runtime = JobRuntime::new(
        store.clone(),
        dead_letters.clone(),
        MetricsRegistry::new(),
        JobsConfig::default(),
    );

    let handled = Arc::new(AtomicUsize::new(0));
    for queue in QueueName::ALL {
        let handled = handled.clone();
        runtime
            .register(queue, move |_ctx: JobContext| {
                let handled = handled.clone();
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), JobError>(())
                }
            })
            .unwrap();
    }
    runtime.start().unwrap();

    let producer = runtime.producer();
    producer
        .enqueue(EnqueueRequest::new(
            QueueName::ReportProcessing,
            "image-analysis",
            json!({"reportId": "r-2"}),
        ))
        .await
        .unwrap();
    producer
        .enqueue(EnqueueRequest::new(
            QueueName::Notifications,
            "report-status-change",
            json!({"reportId": "r-2"}),
        ))
        .await
        .unwrap();

    eventually(|| {
        handled.load(Ordering::SeqCst) == 2
            && runtime.pool_stats().iter().map(|s| s.jobs_processed).sum::<u64>() == 2
    })
    .await;

    let snapshot = runtime.ops_service().snapshot().await;
    assert_eq!(snapshot.queues[&QueueName::ReportProcessing].completed, 1);
    assert_eq!(snapshot.queues[&QueueName::Notifications].completed, 1);
    assert_eq!(snapshot.dead_letters.total, 0);

    runtime.shutdown().await;
    assert!(runtime.pool_stats().is_empty());
}
