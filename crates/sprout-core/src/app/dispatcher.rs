//! Dispatcher - task の投入 API
//!
//! producer（HTTP handler、processor、scheduler）はここから task を投入します。
//! 投入は store への push が終われば返り、実行の完了は待ちません。
//!
//! # 検証（投入時に fail-fast）
//! - kind が queue に属すること（`WrongQueue`）
//! - payload の中身（`InvalidPayload`）
//! - `repeat` の cron 式（`InvalidSchedule`）

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::scheduler::{RecurringTask, ScheduleTable};
use crate::domain::{
    Correlation, CronSchedule, EventType, InvalidCron, LifecycleEvent, QueueName, ScheduleId,
    TaskEnvelope, TaskId, TaskPayload,
};
use crate::error::DispatchError;
use crate::ports::{Clock, EventSink, IdGenerator};
use crate::queue::{PushOutcome, QueueStore, RetryPolicy, TaskRecord, TaskState};

/// Per-queue defaults applied when the caller does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueDefaults {
    pub max_attempts: u32,
    pub backoff: RetryPolicy,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// Run no earlier than this long from now.
    pub delay: Option<Duration>,
    /// Cron expression; registers a recurring task instead of a single one.
    pub repeat: Option<String>,
    /// Lower runs first; defaults to [`DEFAULT_PRIORITY`](crate::queue::DEFAULT_PRIORITY).
    pub priority: Option<u8>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<RetryPolicy>,
    pub correlation: Correlation,
    pub metadata: Option<Value>,
    /// While a task holding this key is live, identical pushes are dropped.
    pub dedupe_key: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn repeat(mut self, cron: impl Into<String>) -> Self {
        self.repeat = Some(cron.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskHandle {
    Queued {
        task_id: TaskId,
        /// Another task took the dedupe key within `DEDUPE_TTL`; `task_id` is that task.
        duplicate: bool,
    },
    Recurring {
        schedule_id: ScheduleId,
        next_fire: DateTime<Utc>,
    },
}

impl TaskHandle {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskHandle::Queued { task_id, .. } => Some(*task_id),
            TaskHandle::Recurring { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    defaults: Arc<[QueueDefaults; QueueName::ALL.len()]>,
    schedules: Option<Arc<ScheduleTable>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            events,
            defaults: Arc::new([QueueDefaults::default(); QueueName::ALL.len()]),
            schedules: None,
        }
    }

    pub fn with_defaults(mut self, defaults: [QueueDefaults; QueueName::ALL.len()]) -> Self {
        self.defaults = Arc::new(defaults);
        self
    }

    pub(crate) fn with_schedules(mut self, table: Arc<ScheduleTable>) -> Self {
        self.schedules = Some(table);
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Submit `payload` to `queue`.
    ///
    /// # Errors
    ///
    /// `QueueUnavailable` when the store cannot be reached; producers should
    /// log it and carry on (see [`DispatchResultExt::or_log`]).
    pub async fn enqueue(
        &self,
        queue: QueueName,
        payload: TaskPayload,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, DispatchError> {
        let kind = payload.kind();
        if kind.queue() != queue {
            return Err(DispatchError::WrongQueue {
                queue,
                kind,
                expected: kind.queue(),
            });
        }
        payload.validate()?;

        if let Some(expression) = options.repeat.clone() {
            return self.register_recurring(None, &expression, payload, options).await;
        }

        let record = self.build_record(payload, &options);
        self.push(record).await
    }

    /// [`enqueue`](Self::enqueue) on the payload's own queue.
    pub async fn dispatch(
        &self,
        payload: TaskPayload,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, DispatchError> {
        let queue = payload.kind().queue();
        self.enqueue(queue, payload, options).await
    }

    /// Register a named recurring task (config schedules use this).
    pub(crate) async fn register_recurring(
        &self,
        name: Option<String>,
        expression: &str,
        payload: TaskPayload,
        mut options: EnqueueOptions,
    ) -> Result<TaskHandle, DispatchError> {
        let schedule = CronSchedule::parse(expression)?;
        let table = self
            .schedules
            .as_ref()
            .ok_or(DispatchError::SchedulerUnavailable)?;
        let next_fire = schedule
            .next_after(self.clock.now())
            .ok_or_else(|| InvalidCron {
                expression: expression.to_string(),
                reason: "never fires".to_string(),
            })?;

        options.repeat = None;
        let schedule_id = self.ids.generate_schedule_id();
        let name = name.unwrap_or_else(|| schedule_id.to_string());
        debug!(schedule = %name, cron = %schedule, kind = %payload.kind(), %next_fire, "recurring task registered");
        table
            .insert(RecurringTask {
                id: schedule_id,
                name,
                schedule,
                payload,
                options,
                next_fire,
            })
            .await;
        Ok(TaskHandle::Recurring {
            schedule_id,
            next_fire,
        })
    }

    /// One fire of a recurring task. The dedupe key makes every process
    /// running the same schedule agree on a single task per fire time.
    pub(crate) async fn fire(
        &self,
        task: &RecurringTask,
        fire_at: DateTime<Utc>,
    ) -> Result<TaskHandle, DispatchError> {
        let options = EnqueueOptions {
            dedupe_key: Some(format!(
                "schedule:{}:{}",
                task.name,
                fire_at.timestamp_millis()
            )),
            ..task.options.clone()
        };
        let record = self.build_record(task.payload.clone(), &options);
        self.push(record).await
    }

    fn build_record(&self, payload: TaskPayload, options: &EnqueueOptions) -> TaskRecord {
        let now = self.clock.now();
        let defaults = self.defaults[payload.kind().queue() as usize];
        let envelope = TaskEnvelope::new(self.ids.generate_task_id(), payload)
            .with_correlation(options.correlation.clone())
            .with_metadata(options.metadata.clone());

        let mut record = TaskRecord::new(
            envelope,
            options.max_attempts.unwrap_or(defaults.max_attempts),
            options.backoff.unwrap_or(defaults.backoff),
            now,
        )
        .with_dedupe_key(options.dedupe_key.clone());
        if let Some(priority) = options.priority {
            record = record.with_priority(priority);
        }
        if let Some(delay) = options.delay
            && let Ok(delay) = chrono::Duration::from_std(delay)
        {
            record = record.delayed_until(now + delay);
        }
        record
    }

    async fn push(&self, record: TaskRecord) -> Result<TaskHandle, DispatchError> {
        let queue = record.queue();
        let event = if record.state == TaskState::Delayed {
            EventType::Delayed
        } else {
            EventType::Waiting
        };
        let lifecycle = LifecycleEvent::new(
            queue,
            record.id(),
            record.kind(),
            event,
            0,
            self.clock.now(),
        );

        match self.store.push(record).await {
            Ok(PushOutcome::Stored(task_id)) => {
                self.events.emit(&lifecycle);
                Ok(TaskHandle::Queued {
                    task_id,
                    duplicate: false,
                })
            }
            Ok(PushOutcome::Duplicate(task_id)) => {
                debug!(queue = %queue, task_id = %task_id, "duplicate push dropped");
                Ok(TaskHandle::Queued {
                    task_id,
                    duplicate: true,
                })
            }
            Err(e) => Err(DispatchError::from_store(queue, e)),
        }
    }
}

/// Producer-side helper: an enqueue failure must not break the caller's
/// primary operation.
pub trait DispatchResultExt {
    /// Log the error at WARN and swallow it.
    fn or_log(self, context: &str) -> Option<TaskHandle>;
}

impl DispatchResultExt for Result<TaskHandle, DispatchError> {
    fn or_log(self, context: &str) -> Option<TaskHandle> {
        match self {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, context, "task not enqueued");
                None
            }
        }
    }
}
