//! Redis dead-letter store implementation.

use super::DeadLetterKeys;
use crate::dead_letter::{sort_groups, DeadLetterGroup, DeadLetterRecord, DeadLetterStore};
use crate::error::JobResult;
use crate::job::{JobType, QueueName};
use async_trait::async_trait;
use civic_core::{Page, PageRequest};
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Delete a record and decrement its group count.
///
/// KEYS: records, index, by-type. ARGV: record id. Returns 1 if deleted.
const DELETE_SCRIPT: &str = r#"
local body = redis.call('HGET', KEYS[1], ARGV[1])
if not body then
  return 0
end
local record = cjson.decode(body)
local field = record['queue'] .. '|' .. record['jobType']
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
if redis.call('HINCRBY', KEYS[3], field, -1) <= 0 then
  redis.call('HDEL', KEYS[3], field)
end
return 1
"#;

/// Redis-backed [`DeadLetterStore`].
///
/// Lives under its own key prefix so records survive job-store cleanups.
pub struct RedisDeadLetterStore {
    pool: Pool,
    keys: DeadLetterKeys,
    delete_script: Script,
}

impl RedisDeadLetterStore {
    /// Create a new Redis dead-letter store.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: DeadLetterKeys::new(key_prefix),
            delete_script: Script::new(DELETE_SCRIPT),
        }
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn parse_group(field: &str, count: i64) -> Option<DeadLetterGroup> {
    let (queue, job_type) = field.split_once('|')?;
    let queue: QueueName = queue.parse().ok()?;
    let count = u64::try_from(count).ok().filter(|c| *c > 0)?;
    Some(DeadLetterGroup {
        queue,
        job_type: JobType::new(job_type),
        count,
    })
}

#[async_trait]
impl DeadLetterStore for RedisDeadLetterStore {
    async fn insert(&self, record: &DeadLetterRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let body = serde_json::to_string(record)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(self.keys.records(), &record.id, body)
            .ignore()
            .zadd(self.keys.index(), &record.id, record.recorded_at.timestamp_millis())
            .ignore()
            .hincr(
                self.keys.by_type(),
                DeadLetterKeys::group_field(record.queue, record.job_type.as_str()),
                1i64,
            )
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(record_id = %record.id, job_id = %record.job_id, "Stored dead-letter record");
        Ok(())
    }

    async fn list(&self, request: PageRequest) -> JobResult<Page<DeadLetterRecord>> {
        let mut conn = self.conn().await?;

        let total: u64 = conn.zcard(self.keys.index()).await?;
        let start = isize::try_from(request.offset()).unwrap_or(isize::MAX);
        let stop = start.saturating_add(isize::try_from(request.limit()).unwrap_or(isize::MAX) - 1);
        let ids: Vec<String> = conn.zrevrange(self.keys.index(), start, stop).await?;
        if ids.is_empty() {
            return Ok(Page::new(Vec::new(), request, total));
        }

        let bodies: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.keys.records())
            .arg(&ids)
            .query_async(&mut *conn)
            .await?;

        let mut items = Vec::with_capacity(bodies.len());
        for (id, body) in ids.iter().zip(bodies) {
            let Some(body) = body else {
                warn!(record_id = %id, "Dead-letter index entry without body");
                continue;
            };
            match serde_json::from_str::<DeadLetterRecord>(&body) {
                Ok(record) => items.push(record),
                Err(e) => warn!(record_id = %id, error = %e, "Skipping unreadable dead-letter record"),
            }
        }

        Ok(Page::new(items, request, total))
    }

    async fn get(&self, id: &str) -> JobResult<Option<DeadLetterRecord>> {
        let mut conn = self.conn().await?;
        let body: Option<String> = conn.hget(self.keys.records(), id).await?;
        Ok(body
            .map(|json| serde_json::from_str::<DeadLetterRecord>(&json))
            .transpose()?)
    }

    async fn delete(&self, id: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = self
            .delete_script
            .key(self.keys.records())
            .key(self.keys.index())
            .key(self.keys.by_type())
            .arg(id)
            .invoke_async(&mut *conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn count(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let total: u64 = conn.zcard(self.keys.index()).await?;
        Ok(total)
    }

    async fn counts_by_job_type(&self) -> JobResult<Vec<DeadLetterGroup>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, i64> = conn.hgetall(self.keys.by_type()).await?;

        let mut groups: Vec<_> = fields
            .iter()
            .filter_map(|(field, count)| parse_group(field, *count))
            .collect();
        sort_groups(&mut groups);
        Ok(groups)
    }
}
