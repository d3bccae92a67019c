//! In-memory queue store (ephemeral, single process).

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::{
    DEDUPE_TTL, PushOutcome, QueueCounts, QueueStore, Retention, StoreBackend, TaskLease,
    TaskRecord, TaskState,
};
use crate::domain::{Outcome, QueueName, TaskId};
use crate::error::StoreError;
use crate::ports::Clock;

/// Delayed task entry for the priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// Entries can go stale (task already promoted or finished); they are checked
/// against the record when popped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    run_at: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

/// Claim order: priority, then due time, then id (ULIDs sort by creation).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct WaitingKey {
    priority: u8,
    run_at: DateTime<Utc>,
    task_id: TaskId,
}

impl WaitingKey {
    fn of(record: &TaskRecord) -> Self {
        Self {
            priority: record.priority,
            run_at: record.run_at,
            task_id: record.id(),
        }
    }
}

/// State of one named queue.
#[derive(Default)]
struct QueueState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    waiting: BTreeSet<WaitingKey>,
    delayed: BinaryHeap<ScheduledTask>,
    active: HashSet<TaskId>,

    /// Newest first.
    completed: VecDeque<TaskId>,
    failed: VecDeque<TaskId>,
}

impl QueueState {
    fn insert(&mut self, record: TaskRecord) {
        self.enlist(&record);
        self.records.insert(record.id(), record);
    }

    /// Put the id on the structure matching the record's state.
    fn enlist(&mut self, record: &TaskRecord) {
        match record.state {
            TaskState::Waiting => {
                self.waiting.insert(WaitingKey::of(record));
            }
            TaskState::Delayed => self.delayed.push(ScheduledTask {
                run_at: record.run_at,
                task_id: record.id(),
            }),
            TaskState::Active => {
                self.active.insert(record.id());
            }
            TaskState::Completed | TaskState::Failed => {}
        }
    }

    /// Take the id off waiting/active before a transition. Delayed heap
    /// entries are left to go stale.
    fn delist(&mut self, id: TaskId) {
        if let Some(record) = self.records.get(&id) {
            match record.state {
                TaskState::Waiting => {
                    self.waiting.remove(&WaitingKey::of(record));
                }
                TaskState::Active => {
                    self.active.remove(&id);
                }
                _ => {}
            }
        }
    }

    /// Move delayed tasks to waiting if their time has come.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.delayed.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.task_id)
                && record.state == TaskState::Delayed
                && record.run_at == entry.run_at
            {
                record.promote();
                self.waiting.insert(WaitingKey::of(record));
            }
        }
    }

    /// Record the finished id in its history list and trim to retention.
    fn remember_finished(&mut self, id: TaskId, failed: bool, retention: Retention) {
        let (list, keep) = if failed {
            (&mut self.failed, retention.failed)
        } else {
            (&mut self.completed, retention.completed)
        };
        list.retain(|x| *x != id);
        list.push_front(id);
        while list.len() > keep {
            if let Some(old) = list.pop_back() {
                self.records.remove(&old);
            }
        }
    }

    fn delayed_count(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.state == TaskState::Delayed)
            .count() as u64
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting.len() as u64,
            active: self.active.len() as u64,
            completed: self.completed.len() as u64,
            failed: self.failed.len() as u64,
            delayed: self.delayed_count(),
        }
    }
}

fn lookup<'a>(
    records: &HashMap<TaskId, TaskRecord>,
    ids: impl Iterator<Item = &'a TaskId>,
    limit: usize,
) -> Vec<TaskRecord> {
    ids.filter_map(|id| records.get(id).cloned())
        .take(limit)
        .collect()
}

struct QueueSlot {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-memory queue store.
///
/// Non-durable: everything is lost with the process. Several services in the
/// same process may share one instance through an `Arc`.
pub struct InMemoryQueueStore {
    slots: [Arc<QueueSlot>; QueueName::ALL.len()],
    retention: [Retention; QueueName::ALL.len()],
    dedupe: Mutex<HashMap<String, (TaskId, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    degraded: bool,
    closed: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: std::array::from_fn(|_| {
                Arc::new(QueueSlot {
                    state: Mutex::new(QueueState::default()),
                    notify: Notify::new(),
                })
            }),
            retention: [Retention::default(); QueueName::ALL.len()],
            dedupe: Mutex::new(HashMap::new()),
            clock,
            degraded: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retention(mut self, queue: QueueName, retention: Retention) -> Self {
        self.retention[queue as usize] = retention;
        self
    }

    /// Mark this store as the stand-in for an unreachable durable store.
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    fn slot(&self, queue: QueueName) -> &Arc<QueueSlot> {
        &self.slots[queue as usize]
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("in-memory store closed".to_string()));
        }
        Ok(())
    }

    /// Claim the dedupe key for `id`, or return the task holding it within the TTL.
    async fn reserve_dedupe(&self, key: &str, id: TaskId, now: DateTime<Utc>) -> Option<TaskId> {
        let mut dedupe = self.dedupe.lock().await;
        dedupe.retain(|_, (_, expires_at)| *expires_at > now);
        if let Some((holder, _)) = dedupe.get(key) {
            return Some(*holder);
        }
        let ttl = chrono::Duration::from_std(DEDUPE_TTL).unwrap_or(chrono::Duration::days(1));
        dedupe.insert(key.to_string(), (id, now + ttl));
        None
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn is_degraded(&self) -> bool {
        self.degraded
    }

    async fn push(&self, record: TaskRecord) -> Result<PushOutcome, StoreError> {
        self.ensure_open()?;
        let id = record.id();
        if let Some(key) = record.dedupe_key.as_deref()
            && let Some(holder) = self.reserve_dedupe(key, id, self.clock.now()).await
        {
            return Ok(PushOutcome::Duplicate(holder));
        }

        let slot = self.slot(record.queue());
        slot.state.lock().await.insert(record);

        // Notify waiting workers (outside the lock)
        slot.notify.notify_one();
        Ok(PushOutcome::Stored(id))
    }

    async fn claim_next(
        &self,
        queue: QueueName,
        worker: &str,
    ) -> Result<Option<Box<dyn TaskLease>>, StoreError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let slot = self.slot(queue);
        let mut guard = slot.state.lock().await;
        let state = &mut *guard;
        state.promote_due(now);

        while let Some(key) = state.waiting.pop_first() {
            if let Some(record) = state.records.get_mut(&key.task_id)
                && record.state == TaskState::Waiting
            {
                record.start_attempt(worker, now);
                state.active.insert(key.task_id);
                let lease = InMemoryLease {
                    record: record.clone(),
                    slot: Arc::clone(slot),
                    clock: Arc::clone(&self.clock),
                    retention: self.retention[queue as usize],
                };
                return Ok(Some(Box::new(lease)));
            }
        }
        Ok(None)
    }

    async fn wait_for_work(&self, queue: QueueName, max_wait: Duration) {
        let slot = self.slot(queue);
        let next_due = slot.state.lock().await.delayed.peek().map(|e| e.run_at);
        let wait = match next_due {
            Some(at) => (at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(max_wait),
            None => max_wait,
        };

        tokio::select! {
            _ = slot.notify.notified() => {},
            _ = tokio::time::sleep(wait) => {},
        }
    }

    async fn requeue_stalled(
        &self,
        queue: QueueName,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.ensure_open()?;
        let slot = self.slot(queue);
        let requeued = {
            let mut guard = slot.state.lock().await;
            let state = &mut *guard;
            let stalled: Vec<TaskId> = state
                .active
                .iter()
                .filter(|id| {
                    state
                        .records
                        .get(id)
                        .and_then(|r| r.heartbeat_at)
                        .is_none_or(|at| at < older_than)
                })
                .copied()
                .collect();

            let mut requeued = Vec::with_capacity(stalled.len());
            for id in stalled {
                state.active.remove(&id);
                if let Some(record) = state.records.get_mut(&id) {
                    record.requeue_stalled();
                    state.waiting.insert(WaitingKey::of(record));
                    requeued.push(record.clone());
                }
            }
            requeued
        };

        for _ in &requeued {
            slot.notify.notify_one();
        }
        Ok(requeued)
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, StoreError> {
        self.ensure_open()?;
        Ok(self.slot(queue).state.lock().await.counts())
    }

    async fn get(&self, queue: QueueName, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.slot(queue).state.lock().await.records.get(&id).cloned())
    }

    async fn recent(
        &self,
        queue: QueueName,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.ensure_open()?;
        let guard = self.slot(queue).state.lock().await;
        let records = match state {
            TaskState::Completed => lookup(&guard.records, guard.completed.iter(), limit),
            TaskState::Failed => lookup(&guard.records, guard.failed.iter(), limit),
            TaskState::Waiting => lookup(
                &guard.records,
                guard.waiting.iter().map(|k| &k.task_id),
                limit,
            ),
            TaskState::Active | TaskState::Delayed => {
                let mut matching: Vec<TaskRecord> = guard
                    .records
                    .values()
                    .filter(|r| r.state == state)
                    .cloned()
                    .collect();
                matching.sort_by_key(|r| (r.claimed_at, r.run_at, r.id()));
                matching.truncate(limit);
                matching
            }
        };
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        for slot in &self.slots {
            slot.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Lease implementation for InMemoryQueueStore.
struct InMemoryLease {
    record: TaskRecord,
    slot: Arc<QueueSlot>,
    clock: Arc<dyn Clock>,
    retention: Retention,
}

impl InMemoryLease {
    fn missing(&self) -> StoreError {
        StoreError::NotFound {
            queue: self.record.queue(),
            id: self.record.id(),
        }
    }

    /// Finish the task. A record that already reached a terminal state (the
    /// task was requeued and finished elsewhere) is returned unchanged, and so
    /// is a failure reported through a lease that no longer holds the task.
    async fn finish(
        &self,
        failed: bool,
        apply: impl FnOnce(&mut TaskRecord, DateTime<Utc>),
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let id = self.record.id();
        let mut guard = self.slot.state.lock().await;
        let state = &mut *guard;

        match state.records.get(&id) {
            None => return Err(self.missing()),
            Some(record) if record.state.is_terminal() => return Ok(record.clone()),
            Some(record) if failed && !record.held_by(&self.record) => return Ok(record.clone()),
            Some(_) => {}
        }

        state.delist(id);
        let finished = match state.records.get_mut(&id) {
            Some(record) => {
                apply(record, now);
                record.clone()
            }
            None => return Err(self.missing()),
        };
        state.remember_finished(id, failed, self.retention);
        Ok(finished)
    }
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn heartbeat(&self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.slot.state.lock().await;
        if let Some(record) = state.records.get_mut(&self.record.id())
            && record.state == TaskState::Active
            && record.worker == self.record.worker
        {
            record.heartbeat(now);
        }
        Ok(())
    }

    async fn complete(self: Box<Self>, outcome: Outcome) -> Result<TaskRecord, StoreError> {
        self.finish(false, |record, now| record.mark_completed(outcome, now))
            .await
    }

    async fn retry(
        self: Box<Self>,
        run_at: DateTime<Utc>,
        error: String,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let id = self.record.id();
        let retried = {
            let mut guard = self.slot.state.lock().await;
            let state = &mut *guard;
            match state.records.get(&id) {
                None => return Err(self.missing()),
                // requeued, re-claimed or finished since this lease was taken
                Some(record) if !record.held_by(&self.record) => return Ok(record.clone()),
                Some(_) => {}
            }
            state.delist(id);
            let Some(record) = state.records.get_mut(&id) else {
                return Err(self.missing());
            };
            record.schedule_retry(run_at, error, now);
            let retried = record.clone();
            state.enlist(&retried);
            retried
        }; // Lock released here

        // Notify outside the lock so a waiting slot recomputes its wake-up
        self.slot.notify.notify_one();
        Ok(retried)
    }

    async fn fail(self: Box<Self>, error: String) -> Result<TaskRecord, StoreError> {
        self.finish(true, |record, now| record.mark_failed(error, now))
            .await
    }
}
