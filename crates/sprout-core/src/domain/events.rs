//! Lifecycle events emitted while a task moves through its queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{QueueName, TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Stored and eligible now.
    Waiting,
    /// Stored with a future run time (initial delay or retry backoff).
    Delayed,
    Active,
    Completed,
    /// An attempt failed. `retry_at` tells whether another attempt follows.
    Failed,
    /// Claimed but heartbeat went silent; put back to waiting.
    Stalled,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Waiting => "waiting",
            EventType::Delayed => "delayed",
            EventType::Active => "active",
            EventType::Completed => "completed",
            EventType::Failed => "failed",
            EventType::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub queue: QueueName,
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub event: EventType,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        queue: QueueName,
        task_id: TaskId,
        kind: TaskKind,
        event: EventType,
        attempt: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue,
            task_id,
            kind,
            event,
            attempt,
            duration_ms: None,
            error: None,
            retry_at: None,
            at,
        }
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.retry_at = Some(at);
        self
    }

    /// A failure with no further attempt scheduled.
    pub fn is_terminal_failure(&self) -> bool {
        self.event == EventType::Failed && self.retry_at.is_none()
    }
}
