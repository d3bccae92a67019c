//! ReaperLoop - 止まった task の回収
//!
//! # フロー
//! 1. 各 queue で heartbeat が `stall_timeout` より古い active task を探す
//! 2. `QueueStore::requeue_stalled()` で waiting に戻す
//! 3. `stalled` event を出す
//!
//! worker が落ちても（hard kill、lease の drop）task は失われず、
//! 別のスロットが拾い直します（at-least-once）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::{EventType, LifecycleEvent, QueueName};
use crate::ports::{Clock, EventSink};
use crate::queue::QueueStore;

pub struct ReaperLoop {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    stall_timeout: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        stall_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            stall_timeout,
            interval,
        }
    }

    /// One pass over every queue. Returns how many tasks were requeued.
    pub async fn reap_once(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now
            - chrono::Duration::from_std(self.stall_timeout).unwrap_or(chrono::Duration::zero());
        let mut requeued = 0;
        for queue in QueueName::ALL {
            match self.store.requeue_stalled(queue, cutoff).await {
                Ok(records) => {
                    for record in records {
                        warn!(
                            queue = %queue,
                            task_id = %record.id(),
                            kind = %record.kind(),
                            attempt = record.attempts,
                            "stalled task requeued"
                        );
                        self.events.emit(&LifecycleEvent::new(
                            queue,
                            record.id(),
                            record.kind(),
                            EventType::Stalled,
                            record.attempts,
                            now,
                        ));
                        requeued += 1;
                    }
                }
                Err(e) => warn!(queue = %queue, error = %e, "stall check failed"),
            }
        }
        requeued
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            stall_timeout_ms = self.stall_timeout.as_millis() as u64,
            "reaper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.reap_once().await;
                }
            }
        }
        info!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SendEmail, TaskEnvelope, TaskId, TaskPayload};
    use crate::impls::BroadcastEventSink;
    use crate::ports::FixedClock;
    use crate::queue::{InMemoryQueueStore, RetryPolicy, TaskRecord, TaskState};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn dropped_lease_is_requeued_after_the_timeout() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryQueueStore::new(clock.clone()));
        let events = BroadcastEventSink::new(16);
        let mut rx = events.subscribe();

        let record = TaskRecord::new(
            TaskEnvelope::new(
                TaskId::from_ulid(ulid::Ulid::new()),
                TaskPayload::SendEmail(SendEmail {
                    to: "parent@example.com".into(),
                    subject: "Welcome".into(),
                    template: "welcome".into(),
                    context: Default::default(),
                }),
            ),
            3,
            RetryPolicy::default(),
            clock.now(),
        );
        let id = record.id();
        store.push(record).await.unwrap();
        let lease = store.claim_next(QueueName::Email, "email-0").await.unwrap();
        drop(lease); // the worker dies

        let reaper = ReaperLoop::new(
            store.clone(),
            clock.clone(),
            Arc::new(events),
            Duration::from_secs(30),
            Duration::from_secs(5),
        );
        assert_eq!(reaper.reap_once().await, 0);

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(reaper.reap_once().await, 1);

        let record = store.get(QueueName::Email, id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Waiting);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, EventType::Stalled);
        assert_eq!(event.task_id, id);
    }
}
