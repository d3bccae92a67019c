//! Task record: envelope + execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RetryPolicy, TaskState};
use crate::domain::{Outcome, QueueName, TaskEnvelope, TaskId, TaskKind};

/// Lower runs first.
pub const DEFAULT_PRIORITY: u8 = 10;
pub const MAX_PRIORITY: u8 = 100;

/// Envelope + execution state for a task in a queue.
///
/// - This is the "single source of truth" for task state; queue structures
///   (waiting/delayed/active) hold TaskIds only.
/// - All state transitions happen here. Stores persist it as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub envelope: TaskEnvelope,
    pub state: TaskState,

    /// Attempts started so far, including the current one while Active.
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: RetryPolicy,
    pub priority: u8,

    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the task may run.
    pub run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    /// Worker slot currently (or last) holding the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl TaskRecord {
    pub fn new(
        envelope: TaskEnvelope,
        max_attempts: u32,
        backoff: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            envelope,
            state: TaskState::Waiting,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            backoff,
            priority: DEFAULT_PRIORITY,
            enqueued_at: now,
            run_at: now,
            claimed_at: None,
            heartbeat_at: None,
            finished_at: None,
            last_error: None,
            dedupe_key: None,
            worker: None,
            outcome: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_dedupe_key(mut self, key: Option<String>) -> Self {
        self.dedupe_key = key;
        self
    }

    /// Hold the task until `run_at`. A time not after `enqueued_at` keeps it waiting.
    pub fn delayed_until(mut self, run_at: DateTime<Utc>) -> Self {
        if run_at > self.enqueued_at {
            self.run_at = run_at;
            self.state = TaskState::Delayed;
        }
        self
    }

    pub fn id(&self) -> TaskId {
        self.envelope.task_id()
    }

    pub fn kind(&self) -> TaskKind {
        self.envelope.kind()
    }

    /// Queue the record lives on (fixed by its kind).
    pub fn queue(&self) -> QueueName {
        self.envelope.kind().queue()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }

    /// Mark as active (increment attempts).
    pub fn start_attempt(&mut self, worker: &str, now: DateTime<Utc>) {
        self.state = TaskState::Active;
        self.attempts += 1;
        self.claimed_at = Some(now);
        self.heartbeat_at = Some(now);
        self.worker = Some(worker.to_string());
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.heartbeat_at = Some(now);
    }

    pub fn mark_completed(&mut self, outcome: Outcome, now: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.outcome = Some(outcome);
        self.finished_at = Some(now);
    }

    /// Terminal failure.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.state = TaskState::Failed;
        self.last_error = Some(error);
        self.finished_at = Some(now);
    }

    /// Schedule retry with backoff. A `run_at` already due goes straight back to waiting.
    pub fn schedule_retry(&mut self, run_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.state = if run_at > now {
            TaskState::Delayed
        } else {
            TaskState::Waiting
        };
        self.run_at = run_at;
        self.last_error = Some(error);
        self.claimed_at = None;
        self.worker = None;
    }

    /// Move from Delayed back to Waiting.
    pub fn promote(&mut self) {
        self.state = TaskState::Waiting;
    }

    /// Active task whose heartbeat went silent goes back to waiting. `run_at`
    /// is left alone so it keeps its place ahead of newer work.
    pub fn requeue_stalled(&mut self) {
        self.state = TaskState::Waiting;
        self.claimed_at = None;
        self.worker = None;
    }

    /// Whether this stored record is still the claim `lease` was handed:
    /// active, same worker, same attempt. False once the task was requeued,
    /// re-claimed or finished.
    pub fn held_by(&self, lease: &TaskRecord) -> bool {
        self.state == TaskState::Active
            && self.worker == lease.worker
            && self.attempts == lease.attempts
    }

    /// Whether this stored record is `claim` rescheduled for `run_at`.
    pub fn is_retry_of(&self, claim: &TaskRecord, run_at: DateTime<Utc>) -> bool {
        matches!(self.state, TaskState::Delayed | TaskState::Waiting)
            && self.attempts == claim.attempts
            && self.run_at == run_at
    }

    /// Claimed more often than allowed; stalls burn attempts too.
    pub fn attempts_exceeded(&self) -> bool {
        self.attempts > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SendSms, TaskPayload};
    use chrono::Duration;
    use ulid::Ulid;

    fn record(now: DateTime<Utc>) -> TaskRecord {
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskPayload::SendSms(SendSms {
                to: "+15550001111".into(),
                message: "see you soon".into(),
            }),
        );
        TaskRecord::new(envelope, 3, RetryPolicy::default(), now)
    }

    #[test]
    fn queue_follows_kind() {
        assert_eq!(record(Utc::now()).queue(), QueueName::Notification);
    }

    #[test]
    fn delay_in_the_past_keeps_waiting() {
        let now = Utc::now();
        let r = record(now).delayed_until(now - Duration::seconds(5));
        assert_eq!(r.state, TaskState::Waiting);
        let r = record(now).delayed_until(now + Duration::seconds(5));
        assert_eq!(r.state, TaskState::Delayed);
        assert!(!r.is_due(now));
    }

    #[test]
    fn retry_clears_the_claim() {
        let now = Utc::now();
        let mut r = record(now);
        r.start_attempt("notification-0", now);
        assert_eq!(r.attempts, 1);
        r.schedule_retry(now + Duration::seconds(2), "timeout".into(), now);
        assert_eq!(r.state, TaskState::Delayed);
        assert!(r.worker.is_none());
        assert_eq!(r.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn requeued_claim_is_no_longer_held() {
        let now = Utc::now();
        let mut stored = record(now);
        stored.start_attempt("payment-0", now);
        let first = stored.clone();
        assert!(stored.held_by(&first));

        stored.requeue_stalled();
        assert!(!stored.held_by(&first));
        stored.start_attempt("payment-0", now);
        // same slot name, later attempt
        assert!(!stored.held_by(&first));
    }

    #[test]
    fn record_serializes_as_camel_case_json() {
        let r = record(Utc::now()).with_priority(250);
        assert_eq!(r.priority, MAX_PRIORITY);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["state"], "waiting");
        assert_eq!(v["maxAttempts"], 3);
        assert_eq!(v["envelope"]["payload"]["kind"], "send-sms");
        let back: TaskRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
