//! Decision model: what happens to a task after a failed attempt.

use std::time::Duration;

use super::ProcessorError;
use crate::queue::TaskRecord;

/// The next action to take for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run again after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up. The record stays in the failed list for inspection.
    Fail { reason: String },
}

/// Deciders are pure: given the record (attempts already incremented for
/// the current attempt) and the error, return the next action. Applying it is
/// the lease's job.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, error: &ProcessorError) -> Decision;
}

/// Attempt-based retry with the record's own backoff policy.
///
/// - permanent error -> fail immediately
/// - attempts >= max_attempts -> fail
/// - otherwise retry after `backoff.next_delay(attempts)`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, error: &ProcessorError) -> Decision {
        if error.is_permanent() {
            return Decision::Fail {
                reason: error.to_string(),
            };
        }
        if task.attempts >= task.max_attempts {
            return Decision::Fail {
                reason: format!(
                    "attempts exhausted ({}/{}): {}",
                    task.attempts, task.max_attempts, error.message
                ),
            };
        }
        let delay = task.backoff.next_delay(task.attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}: {}",
                task.attempts + 1,
                task.max_attempts,
                delay,
                error.message
            ),
        }
    }
}
