//! Integration tests for the Redis job and dead-letter stores.
//!
//! These tests run against a real Redis server using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use chrono::Utc;
use civic_core::PageRequest;
use civic_jobs::{
    BackoffPolicy, DeadLetterRecord, DeadLetterStore, JobData, JobOptions, JobState, JobStore,
    JobType, QueueName,
};
use common::TestRedis;
use serde_json::json;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

fn report_job(n: u32) -> JobData {
    JobData::new(
        QueueName::ReportProcessing,
        JobType::new("image-analysis"),
        json!({ "reportId": format!("r-{n}") }),
        JobOptions::new(3, BackoffPolicy::fixed(1000)),
    )
}

fn record(job_type: &str, queue: QueueName, offset_secs: i64) -> DeadLetterRecord {
    let mut job = report_job(0);
    job.queue = queue;
    job.job_type = JobType::new(job_type);
    job.attempts_made = 3;
    let mut record = DeadLetterRecord::from_job(&job, "classifier unavailable");
    record.recorded_at = Utc::now() + chrono::Duration::seconds(offset_secs);
    record
}

#[tokio::test]
async fn test_claim_is_fifo_and_marks_job_active() {
    let redis = TestRedis::new().await;
    let store = &redis.jobs;
    let first = report_job(1);
    let second = report_job(2);
    store.push(&first).await.unwrap();
    store.push(&second).await.unwrap();

    let counts = store.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!((counts.waiting, counts.active, counts.delayed), (2, 0, 0));

    let claimed = store
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(claimed.payload, json!({"reportId": "r-1"}));

    let stored = store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Active);

    let next = store
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, second.id);
    assert!(store
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .claim(QueueName::Notifications, "worker-1", LEASE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_claimers_get_one_job_once() {
    let redis = TestRedis::new().await;
    redis.jobs.push(&report_job(1)).await.unwrap();

    let claimers: Vec<_> = (0..16)
        .map(|i| {
            let store = redis.jobs.clone();
            tokio::spawn(async move {
                store
                    .claim(QueueName::ReportProcessing, &format!("worker-{i}"), LEASE)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut claimed = 0;
    for claimer in claimers {
        if claimer.await.unwrap().is_some() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);

    let counts = redis.jobs.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!((counts.waiting, counts.active), (0, 1));
}

#[tokio::test]
async fn test_delayed_job_is_promoted_when_due() {
    let redis = TestRedis::new().await;
    let mut job = report_job(1);
    job.due_at = Utc::now() + chrono::Duration::milliseconds(300);
    redis.jobs.push(&job).await.unwrap();

    let counts = redis.jobs.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!((counts.waiting, counts.delayed), (0, 1));
    assert!(redis
        .jobs
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .is_none());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let claimed = redis
        .jobs
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(redis.jobs.counts(QueueName::ReportProcessing).await.unwrap().delayed, 0);
}

#[tokio::test]
async fn test_schedule_retry_persists_attempts() {
    let redis = TestRedis::new().await;
    let job = report_job(1);
    redis.jobs.push(&job).await.unwrap();

    let mut claimed = redis
        .jobs
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .unwrap();
    claimed.attempts_made = 1;
    claimed.last_error = Some("classifier returned 500".to_string());
    claimed.due_at = Utc::now() + chrono::Duration::milliseconds(300);
    assert!(redis.jobs.schedule_retry(&claimed).await.unwrap());

    let counts = redis.jobs.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!((counts.active, counts.delayed), (0, 1));
    let stored = redis.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::RetryDelayed);
    assert_eq!(stored.attempts_made, 1);
    assert!(stored.worker_id.is_none());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let again = redis
        .jobs
        .claim(QueueName::ReportProcessing, "worker-2", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.attempts_made, 1);
    assert_eq!(again.last_error.as_deref(), Some("classifier returned 500"));
}

#[tokio::test]
async fn test_complete_and_remove_failed_update_counters() {
    let redis = TestRedis::new().await;
    let store = &redis.jobs;
    store.push(&report_job(1)).await.unwrap();
    store.push(&report_job(2)).await.unwrap();

    let done = store
        .claim(QueueName::ReportProcessing, "worker-1", LEASE)
        .await
        .unwrap()
        .unwrap();
    let failed = store
        .claim(QueueName::ReportProcessing, "worker-2", LEASE)
        .await
        .unwrap()
        .unwrap();

    let mut stranger = done.clone();
    stranger.worker_id = Some("worker-9".to_string());
    assert!(!store.complete(&stranger).await.unwrap());

    assert!(store.complete(&done).await.unwrap());
    assert!(store.remove_failed(&failed).await.unwrap());
    assert!(!store.complete(&done).await.unwrap());

    let counts = store.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.active, 0);
    assert!(store.get(&done.id).await.unwrap().is_none());
    assert!(store.get(&failed.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stalled_job_is_recovered_and_late_worker_is_rejected() {
    let redis = TestRedis::new().await;
    let store = &redis.jobs;
    let job = report_job(1);
    store.push(&job).await.unwrap();
    store.push(&report_job(2)).await.unwrap();

    let slow = store
        .claim(QueueName::ReportProcessing, "worker-a", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 1);

    let current = store
        .claim(QueueName::ReportProcessing, "worker-b", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, job.id);
    assert_eq!(current.attempts_made, 0);

    assert!(!store.remove_failed(&slow).await.unwrap());
    assert!(!store.complete(&slow).await.unwrap());
    assert!(store.complete(&current).await.unwrap());

    let counts = store.counts(QueueName::ReportProcessing).await.unwrap();
    assert_eq!((counts.waiting, counts.active), (1, 0));
    assert_eq!((counts.completed, counts.failed), (1, 0));
}

#[tokio::test]
async fn test_extend_lease_keeps_job_active() {
    let redis = TestRedis::new().await;
    redis.jobs.push(&report_job(1)).await.unwrap();

    let claimed = redis
        .jobs
        .claim(QueueName::ReportProcessing, "worker-1", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    redis.jobs.extend_lease(&claimed, LEASE).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(redis.jobs.recover_stalled(QueueName::ReportProcessing).await.unwrap(), 0);
    assert!(redis.jobs.complete(&claimed).await.unwrap());
}

#[tokio::test]
async fn test_dead_letter_list_is_newest_first_and_paginated() {
    let redis = TestRedis::new().await;
    let store = &redis.dead_letters;
    let oldest = record("image-analysis", QueueName::ReportProcessing, -20);
    let middle = record("image-analysis", QueueName::ReportProcessing, -10);
    let newest = record("report-status-change", QueueName::Notifications, 0);
    for r in [&oldest, &middle, &newest] {
        store.insert(r).await.unwrap();
    }

    let page = store.list(PageRequest::first()).await.unwrap();
    assert_eq!(page.total, 3);
    let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, [newest.id.as_str(), middle.id.as_str(), oldest.id.as_str()]);
    assert_eq!(page.items[2], oldest);

    let second = store.list(PageRequest::one_based(2, 2)).await.unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, oldest.id);

    let far = store.list(PageRequest::one_based(usize::MAX, 100)).await.unwrap();
    assert_eq!(far.total, 3);
    assert!(far.items.is_empty());
}

#[tokio::test]
async fn test_dead_letter_get_delete_and_groups() {
    let redis = TestRedis::new().await;
    let store = &redis.dead_letters;
    let a = record("image-analysis", QueueName::ReportProcessing, 0);
    let b = record("image-analysis", QueueName::ReportProcessing, 1);
    let c = record("report-status-change", QueueName::Notifications, 2);
    for r in [&a, &b, &c] {
        store.insert(r).await.unwrap();
    }

    assert_eq!(store.get(&a.id).await.unwrap().as_ref(), Some(&a));
    assert!(store.get("missing").await.unwrap().is_none());
    assert_eq!(store.count().await.unwrap(), 3);

    let groups = store.counts_by_job_type().await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].queue, QueueName::ReportProcessing);
    assert_eq!(groups[0].job_type.as_str(), "image-analysis");
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].job_type.as_str(), "report-status-change");
    assert_eq!(groups[1].count, 1);

    assert!(store.delete(&c.id).await.unwrap());
    assert!(!store.delete(&c.id).await.unwrap());
    assert!(store.delete(&a.id).await.unwrap());

    let groups = store.counts_by_job_type().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].job_type.as_str(), "image-analysis");
    assert_eq!(groups[0].count, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(store.list(PageRequest::first()).await.unwrap().items[0].id, b.id);
}
