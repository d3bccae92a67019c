//! The five named queues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named work queue.
///
/// Each queue has its own worker pool, retry defaults and retention, so a
/// backlog of report generation never delays payment capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Email,
    Notification,
    Payment,
    Report,
    Maintenance,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Email,
        QueueName::Notification,
        QueueName::Payment,
        QueueName::Report,
        QueueName::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Email => "email",
            QueueName::Notification => "notification",
            QueueName::Payment => "payment",
            QueueName::Report => "report",
            QueueName::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue '{0}'")]
pub struct UnknownQueue(pub String);

impl FromStr for QueueName {
    type Err = UnknownQueue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| UnknownQueue(s.to_string()))
    }
}
