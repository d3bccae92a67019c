//! Operator-facing alert channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Correlation, QueueName, TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Something an operator has to look at: money may have moved, or failed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAlert {
    pub severity: Severity,
    pub queue: QueueName,
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub title: String,
    pub detail: String,
    #[serde(default)]
    pub correlation: Correlation,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, alert: OperatorAlert);
}
