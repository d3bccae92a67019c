//! Queue module: task records, retry policy, and the two store strategies.
//!
//! - [`RedisQueueStore`]: durable, shared by every worker process
//! - [`InMemoryQueueStore`]: ephemeral, single process; also the degraded
//!   fallback when Redis is unreachable at startup
//!
//! [`connect_store`] probes the configured backend and picks one.

mod connect;
mod memory;
mod record;
mod redis_store;
mod retry;
mod state;

pub use connect::connect_store;
pub use memory::InMemoryQueueStore;
pub use record::{DEFAULT_PRIORITY, MAX_PRIORITY, TaskRecord};
pub use redis_store::RedisQueueStore;
pub use retry::RetryPolicy;
pub use state::TaskState;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Outcome, QueueName, TaskEnvelope, TaskId};
use crate::error::StoreError;

/// How long a dedupe key blocks identical pushes, whether or not the task
/// holding it has finished.
pub const DEDUPE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A claimed task. The worker owns this lease and must `complete`, `retry`
/// or `fail` it; dropping it leaves the task active until stall detection
/// puts it back.
///
/// - Store manages state transitions (Waiting -> Active -> ...).
/// - Worker executes side effects and reports the result.
/// - Once stall detection requeued the task, the lease is stale: `retry` and
///   `fail` return the stored record unchanged. `complete` still wins unless
///   the task already finished.
#[async_trait]
pub trait TaskLease: Send + Sync {
    /// Record as of claim time (attempts already incremented).
    fn record(&self) -> &TaskRecord;

    fn envelope(&self) -> &TaskEnvelope {
        &self.record().envelope
    }

    /// Keep the claim alive while the processor runs.
    async fn heartbeat(&self) -> Result<(), StoreError>;

    /// Returns the stored record; a terminal one is left unchanged.
    async fn complete(self: Box<Self>, outcome: Outcome) -> Result<TaskRecord, StoreError>;

    /// Put back as delayed until `run_at`. Returns the stored record.
    async fn retry(
        self: Box<Self>,
        run_at: DateTime<Utc>,
        error: String,
    ) -> Result<TaskRecord, StoreError>;

    /// Terminal failure. Returns the stored record.
    async fn fail(self: Box<Self>, error: String) -> Result<TaskRecord, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn is_durable(self) -> bool {
        matches!(self, StoreBackend::Redis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Stored(TaskId),
    /// The dedupe key was taken by this task within the last `DEDUPE_TTL`,
    /// finished or not; nothing was stored.
    Duplicate(TaskId),
}

impl PushOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            PushOutcome::Stored(id) | PushOutcome::Duplicate(id) => *id,
        }
    }
}

/// Per-state counts for one queue. `completed` and `failed` count the
/// retained history, not every task ever finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// How many finished records a queue keeps for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub completed: usize,
    pub failed: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            completed: 50,
            failed: 50,
        }
    }
}

/// Queue store port (strategy).
///
/// Claim is atomic: a task is handed to at most one lease at a time, across
/// every process sharing the store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// In-memory store standing in for an unreachable durable one.
    fn is_degraded(&self) -> bool {
        false
    }

    /// Store a new record (waiting or delayed per its state).
    async fn push(&self, record: TaskRecord) -> Result<PushOutcome, StoreError>;

    /// Claim the next due task, promoting delayed tasks whose time has come.
    async fn claim_next(
        &self,
        queue: QueueName,
        worker: &str,
    ) -> Result<Option<Box<dyn TaskLease>>, StoreError>;

    /// Park until work may be available on `queue`, at most `max_wait`.
    async fn wait_for_work(&self, queue: QueueName, max_wait: Duration);

    /// Move active tasks whose last heartbeat is older than `older_than`
    /// back to waiting. Returns the requeued records.
    async fn requeue_stalled(
        &self,
        queue: QueueName,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, StoreError>;

    async fn get(&self, queue: QueueName, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Up to `limit` records in `state`; newest first for completed/failed,
    /// claim order otherwise.
    async fn recent(
        &self,
        queue: QueueName,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
