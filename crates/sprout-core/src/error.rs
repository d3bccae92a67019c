use thiserror::Error;

use crate::domain::{InvalidCron, PayloadError, QueueName, TaskId, TaskKind};

/// Failure talking to the queue store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached (refused, timed out, closed).
    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    #[error("task record could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task {id} not found on queue {queue}")]
    NotFound { queue: QueueName, id: TaskId },

    #[error("queue store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Returned by the dispatcher to producers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Non-fatal for producers: the primary operation should carry on.
    #[error("queue {queue} unavailable: {reason}")]
    QueueUnavailable { queue: QueueName, reason: String },

    #[error("{kind} tasks belong on queue {expected}, not {queue}")]
    WrongQueue {
        queue: QueueName,
        kind: TaskKind,
        expected: QueueName,
    },

    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    #[error(transparent)]
    InvalidSchedule(#[from] InvalidCron),

    #[error("recurring tasks need a running scheduler")]
    SchedulerUnavailable,

    #[error(transparent)]
    Store(StoreError),
}

impl DispatchError {
    pub(crate) fn from_store(queue: QueueName, e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => DispatchError::QueueUnavailable { queue, reason },
            other => DispatchError::Store(other),
        }
    }

    pub fn is_queue_unavailable(&self) -> bool {
        matches!(self, DispatchError::QueueUnavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}
