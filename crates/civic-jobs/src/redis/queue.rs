//! Redis job store implementation.

use super::RedisKeys;
use crate::error::JobResult;
use crate::job::{JobData, JobId, QueueName};
use crate::store::{JobStore, QueueCounts};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Promote due delayed jobs, pop the oldest waiting job and lease it.
///
/// KEYS: wait, delayed, active, owners. ARGV: now ms, lease deadline ms,
/// worker id.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('LPUSH', KEYS[1], id)
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return false
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
redis.call('HSET', KEYS[4], id, ARGV[3])
return id
"#;

/// Move every expired lease back to the head of the wait list.
///
/// KEYS: active, wait, owners. ARGV: now ms.
const RECOVER_SCRIPT: &str = r#"
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('HDEL', KEYS[3], id)
  redis.call('RPUSH', KEYS[2], id)
end
return stalled
"#;

/// Release an active job held by the calling worker.
///
/// KEYS: active, owners, job body, counter, delayed.
/// ARGV: job id, worker id, mode (`complete`, `fail` or `retry`), retry
/// body, retry due ms. The counter is not touched for `retry`.
/// Returns 0 without changes when the worker no longer holds the job.
const FINALIZE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
  return 0
end
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
if ARGV[3] == 'retry' then
  redis.call('SET', KEYS[3], ARGV[4])
  redis.call('ZADD', KEYS[5], ARGV[5], ARGV[1])
else
  redis.call('DEL', KEYS[3])
  redis.call('INCR', KEYS[4])
end
return 1
"#;

fn deadline_ms(lease: Duration) -> i64 {
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(lease_ms)
}

/// Redis-backed [`JobStore`].
///
/// Membership in the wait list, delayed set and active set is authoritative;
/// the `state` field of a stored body is informational.
pub struct RedisJobStore {
    pool: Pool,
    keys: RedisKeys,
    claim_script: Script,
    recover_script: Script,
    finalize_script: Script,
}

impl RedisJobStore {
    /// Create a new Redis job store.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            claim_script: Script::new(CLAIM_SCRIPT),
            recover_script: Script::new(RECOVER_SCRIPT),
            finalize_script: Script::new(FINALIZE_SCRIPT),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Run the finalize script for `job` as its claiming worker.
    async fn finalize(
        &self,
        job: &JobData,
        mode: &str,
        counter: String,
        retry: Option<(String, i64)>,
    ) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let id = job.id.as_str();
        let (body, due_ms) = retry.unwrap_or_default();

        let released: i64 = self
            .finalize_script
            .key(self.keys.active(job.queue))
            .key(self.keys.owners(job.queue))
            .key(self.keys.job(id))
            .key(counter)
            .key(self.keys.delayed(job.queue))
            .arg(id)
            .arg(job.worker_id.as_deref().unwrap_or_default())
            .arg(mode)
            .arg(body)
            .arg(due_ms)
            .invoke_async(&mut *conn)
            .await?;

        if released == 0 {
            warn!(
                job_id = %job.id,
                worker_id = ?job.worker_id,
                mode,
                "Job is no longer held by this worker, skipping"
            );
        }
        Ok(released == 1)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn push(&self, job: &JobData) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let id = job.id.as_str();
        let due_ms = job.due_at.timestamp_millis();
        let now_ms = Utc::now().timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic().set(self.keys.job(id), job.to_json()?).ignore();
        if due_ms > now_ms {
            pipe.zadd(self.keys.delayed(job.queue), id, due_ms).ignore();
        } else {
            pipe.lpush(self.keys.wait(job.queue), id).ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(job_id = %job.id, queue = %job.queue, "Stored job");
        Ok(())
    }

    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> JobResult<Option<JobData>> {
        let mut conn = self.conn().await?;
        let deadline = deadline_ms(lease);

        let claimed: Option<String> = self
            .claim_script
            .key(self.keys.wait(queue))
            .key(self.keys.delayed(queue))
            .key(self.keys.active(queue))
            .key(self.keys.owners(queue))
            .arg(Utc::now().timestamp_millis())
            .arg(deadline)
            .arg(worker_id)
            .invoke_async(&mut *conn)
            .await?;

        let Some(id) = claimed else {
            return Ok(None);
        };

        let body: Option<String> = conn.get(self.keys.job(&id)).await?;
        let Some(body) = body else {
            warn!(job_id = %id, queue = %queue, "Claimed job has no body, dropping");
            let _: () = redis::pipe()
                .atomic()
                .zrem(self.keys.active(queue), &id)
                .ignore()
                .hdel(self.keys.owners(queue), &id)
                .ignore()
                .query_async(&mut *conn)
                .await?;
            return Ok(None);
        };

        let mut job = match JobData::from_json(&body) {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to deserialize job data, dropping");
                let _: () = redis::pipe()
                    .atomic()
                    .zrem(self.keys.active(queue), &id)
                    .ignore()
                    .hdel(self.keys.owners(queue), &id)
                    .ignore()
                    .del(self.keys.job(&id))
                    .ignore()
                    .query_async(&mut *conn)
                    .await?;
                return Ok(None);
            }
        };

        let lease_until = chrono::DateTime::from_timestamp_millis(deadline).unwrap_or_else(Utc::now);
        job.activate(worker_id, lease_until);
        let _: () = conn.set(self.keys.job(&id), job.to_json()?).await?;

        debug!(job_id = %job.id, queue = %queue, worker_id = %worker_id, "Claimed job");
        Ok(Some(job))
    }

    async fn extend_lease(&self, job: &JobData, lease: Duration) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(self.keys.active(job.queue))
            .arg("XX")
            .arg(deadline_ms(lease))
            .arg(job.id.as_str())
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn complete(&self, job: &JobData) -> JobResult<bool> {
        let done = self
            .finalize(job, "complete", self.keys.completed(job.queue), None)
            .await?;
        if done {
            debug!(job_id = %job.id, "Completed job");
        }
        Ok(done)
    }

    async fn schedule_retry(&self, job: &JobData) -> JobResult<bool> {
        let mut retry = job.clone();
        retry.delay_until(job.due_at);
        let body = retry.to_json()?;

        let scheduled = self
            .finalize(
                job,
                "retry",
                self.keys.completed(job.queue),
                Some((body, job.due_at.timestamp_millis())),
            )
            .await?;
        if scheduled {
            debug!(
                job_id = %job.id,
                attempt = job.attempts_made,
                retry_at = %job.due_at,
                "Scheduled job retry"
            );
        }
        Ok(scheduled)
    }

    async fn remove_failed(&self, job: &JobData) -> JobResult<bool> {
        self.finalize(job, "fail", self.keys.failed(job.queue), None).await
    }

    async fn recover_stalled(&self, queue: QueueName) -> JobResult<u64> {
        let mut conn = self.conn().await?;

        let recovered: Vec<String> = self
            .recover_script
            .key(self.keys.active(queue))
            .key(self.keys.wait(queue))
            .key(self.keys.owners(queue))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;

        if !recovered.is_empty() {
            info!(queue = %queue, count = recovered.len(), "Recovered stalled jobs");
        }
        Ok(recovered.len() as u64)
    }

    async fn counts(&self, queue: QueueName) -> JobResult<QueueCounts> {
        let mut conn = self.conn().await?;

        let (waiting, active, delayed, completed, failed): (u64, u64, u64, Option<u64>, Option<u64>) =
            redis::pipe()
                .llen(self.keys.wait(queue))
                .zcard(self.keys.active(queue))
                .zcard(self.keys.delayed(queue))
                .get(self.keys.completed(queue))
                .get(self.keys.failed(queue))
                .query_async(&mut *conn)
                .await?;

        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobData>> {
        let mut conn = self.conn().await?;
        let body: Option<String> = conn.get(self.keys.job(id.as_str())).await?;
        body.map(|json| JobData::from_json(&json)).transpose()
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}
