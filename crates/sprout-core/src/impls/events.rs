//! EventSink 実装
//!
//! - **TracingEventSink**: 構造化ログに出す
//! - **BroadcastEventSink**: `subscribe()` した受信者に配る
//! - **FanoutEventSink**: 複数の sink に配る

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::{EventType, LifecycleEvent};
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        let queue = event.queue.as_str();
        let kind = event.kind.as_str();
        let task_id = event.task_id.to_string();
        let task_id = task_id.as_str();
        match event.event {
            EventType::Failed if event.is_terminal_failure() => warn!(
                queue,
                kind,
                task_id,
                attempt = event.attempt,
                error = event.error.as_deref().unwrap_or_default(),
                "task failed permanently"
            ),
            EventType::Failed => info!(
                queue,
                kind,
                task_id,
                attempt = event.attempt,
                error = event.error.as_deref().unwrap_or_default(),
                retry_at = ?event.retry_at,
                "task failed, retry scheduled"
            ),
            EventType::Stalled => warn!(queue, kind, task_id, attempt = event.attempt, "task stalled"),
            EventType::Completed => info!(
                queue,
                kind,
                task_id,
                attempt = event.attempt,
                duration_ms = event.duration_ms,
                "task completed"
            ),
            other => tracing::debug!(queue, kind, task_id, attempt = event.attempt, event = ?other, "task event"),
        }
    }
}

/// 受信者のいない送信や lag は無視する（emit は決してブロックしない）
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueName, TaskId, TaskKind};
    use chrono::Utc;

    #[tokio::test]
    async fn fanout_reaches_every_subscriber() {
        let broadcast = BroadcastEventSink::new(8);
        let mut rx = broadcast.subscribe();
        let sink = FanoutEventSink::new()
            .with(Arc::new(TracingEventSink))
            .with(Arc::new(broadcast.clone()));

        let event = LifecycleEvent::new(
            QueueName::Email,
            TaskId::from_ulid(ulid::Ulid::new()),
            TaskKind::SendEmail,
            EventType::Completed,
            1,
            Utc::now(),
        );
        sink.emit(&event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let sink = BroadcastEventSink::default();
        sink.emit(&LifecycleEvent::new(
            QueueName::Payment,
            TaskId::from_ulid(ulid::Ulid::new()),
            TaskKind::ProcessPayment,
            EventType::Waiting,
            0,
            Utc::now(),
        ));
    }
}
