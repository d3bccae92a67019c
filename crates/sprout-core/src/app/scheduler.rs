//! Scheduler - cron による定期投入
//!
//! 登録済みの recurring task を保持し、fire 時刻になったら Dispatcher 経由で
//! 投入します。どの store に対しても動きます。
//!
//! - 取りこぼした fire は後追いしない（次の fire は「今」から計算）
//! - fire ごとの dedupe key で、複数プロセスが同じ schedule を持っても 1 回だけ投入

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

use super::dispatcher::{Dispatcher, EnqueueOptions, TaskHandle};
use crate::domain::{CronSchedule, ScheduleId, TaskPayload};
use crate::error::DispatchError;
use crate::ports::Clock;

#[derive(Debug, Clone)]
pub struct RecurringTask {
    pub id: ScheduleId,
    pub name: String,
    pub schedule: CronSchedule,
    pub payload: TaskPayload,
    /// Applied to every fired task (`repeat` is always cleared).
    pub options: EnqueueOptions,
    pub next_fire: DateTime<Utc>,
}

/// 登録済み recurring task の表
#[derive(Default)]
pub struct ScheduleTable {
    entries: Mutex<BTreeMap<ScheduleId, RecurringTask>>,
    changed: Notify,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: RecurringTask) {
        self.entries.lock().await.insert(task.id, task);
        self.changed.notify_one();
    }

    pub async fn remove(&self, id: ScheduleId) -> bool {
        self.entries.lock().await.remove(&id).is_some()
    }

    pub async fn list(&self) -> Vec<RecurringTask> {
        self.entries.lock().await.values().cloned().collect()
    }

    async fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .await
            .values()
            .map(|t| t.next_fire)
            .min()
    }

    /// Due entries, advanced to their next fire after `now`.
    async fn take_due(&self, now: DateTime<Utc>) -> Vec<(RecurringTask, DateTime<Utc>)> {
        let mut entries = self.entries.lock().await;
        let mut due = Vec::new();
        let mut exhausted = Vec::new();
        for task in entries.values_mut() {
            if task.next_fire > now {
                continue;
            }
            let fire_at = task.next_fire;
            due.push((task.clone(), fire_at));
            match task.schedule.next_after(now) {
                Some(next) => task.next_fire = next,
                None => exhausted.push(task.id),
            }
        }
        for id in exhausted {
            entries.remove(&id);
        }
        due
    }
}

pub struct Scheduler {
    table: Arc<ScheduleTable>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    max_tick: Duration,
}

impl Scheduler {
    pub fn new(
        table: Arc<ScheduleTable>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        max_tick: Duration,
    ) -> Self {
        Self {
            table,
            dispatcher,
            clock,
            max_tick,
        }
    }

    /// Fire everything due now. Returns how many tasks were stored.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        let mut stored = 0;
        for (task, fire_at) in self.table.take_due(now).await {
            match self.dispatcher.fire(&task, fire_at).await {
                Ok(TaskHandle::Queued {
                    task_id,
                    duplicate: false,
                }) => {
                    info!(schedule = %task.name, task_id = %task_id, kind = %task.payload.kind(), "scheduled task enqueued");
                    stored += 1;
                }
                Ok(_) => {
                    debug!(schedule = %task.name, %fire_at, "fire already enqueued by another process");
                }
                Err(DispatchError::QueueUnavailable { queue, reason }) => {
                    warn!(schedule = %task.name, queue = %queue, reason = %reason, "scheduled fire skipped, queue unavailable");
                }
                Err(e) => warn!(schedule = %task.name, error = %e, "scheduled fire failed"),
            }
        }
        stored
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            let now = self.clock.now();
            let wait = match self.table.next_fire().await {
                Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(self.max_tick),
                None => self.max_tick,
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.table.changed.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CleanupSessions, QueueName};
    use crate::ports::{FixedClock, NoopEventSink, UlidGenerator};
    use crate::queue::{InMemoryQueueStore, QueueStore};
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryQueueStore>,
        table: Arc<ScheduleTable>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 2, 59, 0).unwrap(),
        ));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(InMemoryQueueStore::new(Arc::clone(&dyn_clock)));
        let table = Arc::new(ScheduleTable::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::clone(&dyn_clock),
            Arc::new(UlidGenerator::new(Arc::clone(&dyn_clock))),
            Arc::new(NoopEventSink),
        )
        .with_schedules(Arc::clone(&table));
        Fixture {
            clock,
            store,
            table,
            dispatcher,
        }
    }

    fn cleanup() -> TaskPayload {
        TaskPayload::CleanupSessions(CleanupSessions::default())
    }

    #[tokio::test]
    async fn fires_once_per_due_time_without_catch_up() {
        let f = fixture();
        let handle = f
            .dispatcher
            .dispatch(cleanup(), EnqueueOptions::new().repeat("0 3 * * *"))
            .await
            .unwrap();
        let TaskHandle::Recurring { next_fire, .. } = handle else {
            panic!("expected a recurring handle");
        };
        assert_eq!(next_fire, Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap());

        let scheduler = Scheduler::new(
            Arc::clone(&f.table),
            f.dispatcher.clone(),
            f.clock.clone(),
            Duration::from_secs(1),
        );
        assert_eq!(scheduler.tick().await, 0);

        // three days pass while the process sleeps: one fire, not three
        f.clock.advance(chrono::Duration::days(3));
        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(scheduler.tick().await, 0);

        let counts = f.store.counts(QueueName::Maintenance).await.unwrap();
        assert_eq!(counts.waiting, 1);
        let next = f.table.list().await[0].next_fire;
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 4, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn two_schedulers_sharing_a_store_fire_once() {
        let f = fixture();
        f.dispatcher
            .register_recurring(
                Some("nightly-cleanup".into()),
                "0 3 * * *",
                cleanup(),
                EnqueueOptions::new(),
            )
            .await
            .unwrap();

        // a second process with the same configured schedule
        let other_table = Arc::new(ScheduleTable::new());
        let other = f.dispatcher.clone().with_schedules(Arc::clone(&other_table));
        other
            .register_recurring(
                Some("nightly-cleanup".into()),
                "0 3 * * *",
                cleanup(),
                EnqueueOptions::new(),
            )
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::minutes(2));
        let a = Scheduler::new(f.table.clone(), f.dispatcher.clone(), f.clock.clone(), Duration::from_secs(1));
        let b = Scheduler::new(other_table, other, f.clock.clone(), Duration::from_secs(1));
        assert_eq!(a.tick().await + b.tick().await, 1);
    }
}
