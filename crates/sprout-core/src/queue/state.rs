//! Task state machine for a queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a task record.
///
/// State transitions:
/// - Waiting -> Active -> Completed
/// - Waiting -> Active -> Delayed -> Waiting (retry, until max_attempts)
/// - Waiting -> Active -> Failed (attempts exhausted or permanent error)
/// - Active -> Waiting (heartbeat went silent, requeued by stall detection)
/// - Delayed -> Waiting (enqueued with a delay, once due)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Eligible to be claimed now.
    Waiting,

    /// Claimed by a worker slot.
    Active,

    Completed,

    /// Not eligible before `run_at` (initial delay or retry backoff).
    Delayed,

    /// Terminal failure, kept for inspection.
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Waiting,
        TaskState::Active,
        TaskState::Completed,
        TaskState::Delayed,
        TaskState::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Is this task eligible for claim?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Delayed => "delayed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
