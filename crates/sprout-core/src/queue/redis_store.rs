//! Redis-backed queue store (durable, shared by every worker process).
//!
//! Key layout per queue, under `{prefix}:{queue}:`
//! - `tasks`     hash, task id -> record JSON (single source of truth)
//! - `waiting`   sorted set, score = priority × 10¹³ + run-at ms
//! - `delayed`   sorted set, score = run-at ms
//! - `active`    sorted set, score = last heartbeat ms
//! - `completed` / `failed` lists of ids, newest first, trimmed to retention
//!
//! Dedupe keys live at `{prefix}:dedupe:{key}`. Claim, push, finish and
//! stall requeue are Lua scripts so they stay atomic across processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};

use super::{
    DEDUPE_TTL, PushOutcome, QueueCounts, QueueStore, Retention, StoreBackend, TaskLease,
    TaskRecord, TaskState,
};
use crate::domain::{Outcome, QueueName, TaskId};
use crate::error::StoreError;
use crate::ports::Clock;

const PRIORITY_FACTOR: f64 = 1e13;

/// KEYS: tasks, target zset, [dedupe]
/// ARGV: id, record json, score, dedupe ttl ms
const PUSH_SCRIPT: &str = r#"
if KEYS[3] then
  local holder = redis.call('GET', KEYS[3])
  if holder then return holder end
  redis.call('SET', KEYS[3], ARGV[1], 'PX', ARGV[4])
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return false
"#;

/// KEYS: tasks, waiting, delayed, active
/// ARGV: now ms, priority factor
const CLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local factor = tonumber(ARGV[2])
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now, 'WITHSCORES', 'LIMIT', 0, 100)
for i = 1, #due, 2 do
  local id = due[i]
  redis.call('ZREM', KEYS[3], id)
  local json = redis.call('HGET', KEYS[1], id)
  if json then
    local priority = cjson.decode(json)['priority'] or 0
    redis.call('ZADD', KEYS[2], priority * factor + tonumber(due[i + 1]), id)
  end
end
while true do
  local popped = redis.call('ZPOPMIN', KEYS[2])
  if #popped == 0 then return false end
  local json = redis.call('HGET', KEYS[1], popped[1])
  if json then
    redis.call('ZADD', KEYS[4], now, popped[1])
    return json
  end
end
"#;

/// Lua check that the stored record is still the lease's claim.
/// Expects `held` (decoded record), worker in ARGV[w], attempts in ARGV[w + 1].
macro_rules! held_check {
    ($w:literal) => {
        concat!(
            "held['state'] == 'active' and held['worker'] == ARGV[", $w, "] ",
            "and tonumber(held['attempts']) == tonumber(ARGV[", $w, " + 1])"
        )
    };
}

/// KEYS: tasks, active, waiting, history list
/// ARGV: id, record json, retention, owned only (1/0), worker, attempts
///
/// Returns the stored record: unchanged when already terminal, or when
/// `owned only` is set and the lease no longer holds the task.
const FINISH_SCRIPT: &str = concat!(
    r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then return false end
local held = cjson.decode(current)
if held['state'] == 'completed' or held['state'] == 'failed' then return current end
if ARGV[4] == '1' and not ("#,
    held_check!(5),
    r#") then return current end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('LREM', KEYS[4], 0, ARGV[1])
redis.call('LPUSH', KEYS[4], ARGV[1])
local keep = tonumber(ARGV[3])
local trimmed = redis.call('LRANGE', KEYS[4], keep, -1)
if keep <= 0 then
  redis.call('DEL', KEYS[4])
else
  redis.call('LTRIM', KEYS[4], 0, keep - 1)
end
for _, old in ipairs(trimmed) do
  redis.call('HDEL', KEYS[1], old)
end
return ARGV[2]
"#
);

/// KEYS: tasks, active, delayed
/// ARGV: id, record json, run-at ms, worker, attempts
///
/// Returns the stored record; a lease that no longer holds the task changes nothing.
const RETRY_SCRIPT: &str = concat!(
    r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then return false end
local held = cjson.decode(current)
if not ("#,
    held_check!(4),
    r#") then return current end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return ARGV[2]
"#
);

/// KEYS: tasks, active, waiting
/// ARGV: id, record json, cutoff ms, waiting score
const REQUEUE_SCRIPT: &str = r#"
local beat = redis.call('ZSCORE', KEYS[2], ARGV[1])
if not beat or tonumber(beat) > tonumber(ARGV[3]) then return 0 end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
return 1
"#;

/// Classify a Redis error: connection trouble is `Unavailable`.
fn store_error(e: RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn waiting_score(record: &TaskRecord) -> f64 {
    f64::from(record.priority) * PRIORITY_FACTOR + millis(record.run_at) as f64
}

#[derive(Debug, Clone)]
struct QueueKeys {
    tasks: String,
    waiting: String,
    delayed: String,
    active: String,
    completed: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: QueueName) -> Self {
        let base = format!("{prefix}:{queue}");
        Self {
            tasks: format!("{base}:tasks"),
            waiting: format!("{base}:waiting"),
            delayed: format!("{base}:delayed"),
            active: format!("{base}:active"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
        }
    }

    fn zset_for(&self, state: TaskState) -> &str {
        match state {
            TaskState::Delayed => &self.delayed,
            TaskState::Active => &self.active,
            _ => &self.waiting,
        }
    }
}

struct Scripts {
    push: Script,
    claim: Script,
    finish: Script,
    retry: Script,
    requeue: Script,
}

/// Redis-backed queue store.
pub struct RedisQueueStore {
    conn: MultiplexedConnection,
    prefix: String,
    retention: [Retention; QueueName::ALL.len()],
    scripts: Arc<Scripts>,
    clock: Arc<dyn Clock>,
}

impl RedisQueueStore {
    /// Open a multiplexed connection and PING it, both within `timeout`.
    pub async fn connect(
        url: &str,
        prefix: &str,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;

        let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Unavailable(format!("connect to {url} timed out")))?
            .map_err(store_error)?;

        tokio::time::timeout(
            timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Unavailable("PING timed out".to_string()))?
        .map_err(store_error)?;

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            retention: [Retention::default(); QueueName::ALL.len()],
            scripts: Arc::new(Scripts {
                push: Script::new(PUSH_SCRIPT),
                claim: Script::new(CLAIM_SCRIPT),
                finish: Script::new(FINISH_SCRIPT),
                retry: Script::new(RETRY_SCRIPT),
                requeue: Script::new(REQUEUE_SCRIPT),
            }),
            clock,
        })
    }

    pub fn with_retention(mut self, queue: QueueName, retention: Retention) -> Self {
        self.retention[queue as usize] = retention;
        self
    }

    fn keys(&self, queue: QueueName) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    fn dedupe_key(&self, key: &str) -> String {
        format!("{}:dedupe:{key}", self.prefix)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn load(
        &self,
        keys: &QueueKeys,
        ids: &[String],
    ) -> Result<Vec<TaskRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&keys.tasks)
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn push(&self, record: TaskRecord) -> Result<PushOutcome, StoreError> {
        let keys = self.keys(record.queue());
        let id = record.id();
        let score = match record.state {
            TaskState::Delayed => millis(record.run_at) as f64,
            _ => waiting_score(&record),
        };
        let json = serde_json::to_string(&record)?;

        let mut invocation = self.scripts.push.prepare_invoke();
        invocation
            .key(&keys.tasks)
            .key(keys.zset_for(record.state));
        if let Some(dedupe) = record.dedupe_key.as_deref() {
            invocation.key(self.dedupe_key(dedupe));
        }
        invocation
            .arg(id.as_ulid().to_string())
            .arg(json)
            .arg(score)
            .arg(DEDUPE_TTL.as_millis() as u64);

        let mut conn = self.conn();
        let holder: Option<String> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match holder {
            None => Ok(PushOutcome::Stored(id)),
            Some(raw) => raw
                .parse::<TaskId>()
                .map(PushOutcome::Duplicate)
                .map_err(|e| StoreError::Backend(format!("corrupt dedupe holder '{raw}': {e}"))),
        }
    }

    async fn claim_next(
        &self,
        queue: QueueName,
        worker: &str,
    ) -> Result<Option<Box<dyn TaskLease>>, StoreError> {
        let keys = self.keys(queue);
        let now = self.clock.now();
        let mut conn = self.conn();

        let claimed: Option<String> = self
            .scripts
            .claim
            .key(&keys.tasks)
            .key(&keys.waiting)
            .key(&keys.delayed)
            .key(&keys.active)
            .arg(millis(now))
            .arg(PRIORITY_FACTOR)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let Some(json) = claimed else {
            return Ok(None);
        };
        let mut record: TaskRecord = serde_json::from_str(&json)?;
        record.start_attempt(worker, now);

        // The id is already in `active`; a crash before this write leaves the
        // old record, which stall detection requeues like any other.
        redis::cmd("HSET")
            .arg(&keys.tasks)
            .arg(record.id().as_ulid().to_string())
            .arg(serde_json::to_string(&record)?)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(Some(Box::new(RedisLease {
            record,
            keys,
            conn,
            scripts: Arc::clone(&self.scripts),
            clock: Arc::clone(&self.clock),
            retention: self.retention[queue as usize],
        })))
    }

    async fn wait_for_work(&self, _queue: QueueName, max_wait: Duration) {
        // Polling: other processes push without telling us.
        tokio::time::sleep(max_wait).await;
    }

    async fn requeue_stalled(
        &self,
        queue: QueueName,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let keys = self.keys(queue);
        let cutoff = millis(older_than);
        let mut conn = self.conn();

        let stalled: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(&keys.active)
            .arg("-inf")
            .arg(cutoff)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let mut requeued = Vec::with_capacity(stalled.len());
        for (id, beat) in stalled {
            let raw: Option<String> = redis::cmd("HGET")
                .arg(&keys.tasks)
                .arg(&id)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            let Some(raw) = raw else {
                redis::cmd("ZREM")
                    .arg(&keys.active)
                    .arg(&id)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(store_error)?;
                continue;
            };

            let mut record: TaskRecord = serde_json::from_str(&raw)?;
            record.heartbeat_at = Some(from_millis(beat));
            record.requeue_stalled();

            let moved: i64 = self
                .scripts
                .requeue
                .key(&keys.tasks)
                .key(&keys.active)
                .key(&keys.waiting)
                .arg(&id)
                .arg(serde_json::to_string(&record)?)
                .arg(cutoff)
                .arg(waiting_score(&record))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            if moved == 1 {
                requeued.push(record);
            }
        }
        Ok(requeued)
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, StoreError> {
        let keys = self.keys(queue);
        let mut conn = self.conn();
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .cmd("ZCARD")
                .arg(&keys.waiting)
                .cmd("ZCARD")
                .arg(&keys.active)
                .cmd("ZCARD")
                .arg(&keys.delayed)
                .cmd("LLEN")
                .arg(&keys.completed)
                .cmd("LLEN")
                .arg(&keys.failed)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;

        Ok(QueueCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn get(&self, queue: QueueName, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let keys = self.keys(queue);
        Ok(self
            .load(&keys, &[id.as_ulid().to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn recent(
        &self,
        queue: QueueName,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);
        let stop = limit as i64 - 1;
        let mut conn = self.conn();
        let ids: Vec<String> = match state {
            TaskState::Completed | TaskState::Failed => {
                let list = if state == TaskState::Completed {
                    &keys.completed
                } else {
                    &keys.failed
                };
                redis::cmd("LRANGE")
                    .arg(list)
                    .arg(0)
                    .arg(stop)
                    .query_async::<Vec<String>>(&mut conn)
                    .await
            }
            TaskState::Waiting | TaskState::Delayed | TaskState::Active => {
                redis::cmd("ZRANGE")
                    .arg(keys.zset_for(state))
                    .arg(0)
                    .arg(stop)
                    .query_async::<Vec<String>>(&mut conn)
                    .await
            }
        }
        .map_err(store_error)?;

        self.load(&keys, &ids).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // The multiplexed connection closes when the last clone is dropped.
        tracing::debug!(prefix = %self.prefix, "redis queue store closed");
        Ok(())
    }
}

/// Lease implementation for RedisQueueStore.
struct RedisLease {
    record: TaskRecord,
    keys: QueueKeys,
    conn: MultiplexedConnection,
    scripts: Arc<Scripts>,
    clock: Arc<dyn Clock>,
    retention: Retention,
}

impl RedisLease {
    fn member(&self) -> String {
        self.record.id().as_ulid().to_string()
    }

    fn missing(&self) -> StoreError {
        StoreError::NotFound {
            queue: self.record.queue(),
            id: self.record.id(),
        }
    }

    fn claimed_by(&self) -> &str {
        self.record.worker.as_deref().unwrap_or_default()
    }

    fn stored(&self, raw: Option<String>) -> Result<TaskRecord, StoreError> {
        let raw = raw.ok_or_else(|| self.missing())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `record` is the claim as handed out; `finished` its terminal form.
    async fn finish(self, finished: TaskRecord, failed: bool) -> Result<TaskRecord, StoreError> {
        let (list, keep) = if failed {
            (&self.keys.failed, self.retention.failed)
        } else {
            (&self.keys.completed, self.retention.completed)
        };
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .scripts
            .finish
            .key(&self.keys.tasks)
            .key(&self.keys.active)
            .key(&self.keys.waiting)
            .key(list)
            .arg(self.member())
            .arg(serde_json::to_string(&finished)?)
            .arg(keep as u64)
            .arg(if failed { "1" } else { "0" })
            .arg(self.claimed_by())
            .arg(self.record.attempts)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        self.stored(raw)
    }
}

#[async_trait]
impl TaskLease for RedisLease {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn heartbeat(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // XX: never re-add a task that was requeued or finished meanwhile.
        redis::cmd("ZADD")
            .arg(&self.keys.active)
            .arg("XX")
            .arg(millis(self.clock.now()))
            .arg(self.member())
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn complete(self: Box<Self>, outcome: Outcome) -> Result<TaskRecord, StoreError> {
        let mut finished = self.record.clone();
        finished.mark_completed(outcome, self.clock.now());
        (*self).finish(finished, false).await
    }

    async fn retry(
        self: Box<Self>,
        run_at: DateTime<Utc>,
        error: String,
    ) -> Result<TaskRecord, StoreError> {
        let mut retried = self.record.clone();
        retried.schedule_retry(run_at, error, self.clock.now());
        let mut conn = self.conn.clone();

        // Always through `delayed`; the next claim promotes it when due.
        let raw: Option<String> = self
            .scripts
            .retry
            .key(&self.keys.tasks)
            .key(&self.keys.active)
            .key(&self.keys.delayed)
            .arg(self.member())
            .arg(serde_json::to_string(&retried)?)
            .arg(millis(run_at))
            .arg(self.claimed_by())
            .arg(self.record.attempts)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        self.stored(raw)
    }

    async fn fail(self: Box<Self>, error: String) -> Result<TaskRecord, StoreError> {
        let mut finished = self.record.clone();
        finished.mark_failed(error, self.clock.now());
        (*self).finish(finished, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_queue() {
        let keys = QueueKeys::new("sprout", QueueName::Payment);
        assert_eq!(keys.tasks, "sprout:payment:tasks");
        assert_eq!(keys.zset_for(TaskState::Delayed), "sprout:payment:delayed");
        assert_eq!(keys.failed, "sprout:payment:failed");
    }

    #[test]
    fn lease_scripts_check_the_claim() {
        assert!(RETRY_SCRIPT.contains("held['worker'] == ARGV[4]"));
        assert!(RETRY_SCRIPT.contains("tonumber(ARGV[4 + 1])"));
        assert!(FINISH_SCRIPT.contains("held['worker'] == ARGV[5]"));
    }

    #[test]
    fn priority_dominates_the_waiting_score() {
        let now = Utc::now();
        let later = now + chrono::Duration::days(365);
        let urgent = f64::from(1u8) * PRIORITY_FACTOR + millis(later) as f64;
        let routine = f64::from(10u8) * PRIORITY_FACTOR + millis(now) as f64;
        assert!(urgent < routine);
    }
}
