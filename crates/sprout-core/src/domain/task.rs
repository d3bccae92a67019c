use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{QueueName, TaskId, TaskPayload};

/// Which processor handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    SendEmail,
    SendSms,
    SendPushNotification,
    ProcessPayment,
    GenerateReport,
    CleanupSessions,
    SyncExternalData,
    UpdateActivityStats,
    SendBookingReminder,
    ProcessImageUpload,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::SendEmail,
        TaskKind::SendSms,
        TaskKind::SendPushNotification,
        TaskKind::ProcessPayment,
        TaskKind::GenerateReport,
        TaskKind::CleanupSessions,
        TaskKind::SyncExternalData,
        TaskKind::UpdateActivityStats,
        TaskKind::SendBookingReminder,
        TaskKind::ProcessImageUpload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::SendEmail => "send-email",
            TaskKind::SendSms => "send-sms",
            TaskKind::SendPushNotification => "send-push-notification",
            TaskKind::ProcessPayment => "process-payment",
            TaskKind::GenerateReport => "generate-report",
            TaskKind::CleanupSessions => "cleanup-sessions",
            TaskKind::SyncExternalData => "sync-external-data",
            TaskKind::UpdateActivityStats => "update-activity-stats",
            TaskKind::SendBookingReminder => "send-booking-reminder",
            TaskKind::ProcessImageUpload => "process-image-upload",
        }
    }

    /// The only queue this kind may be enqueued on.
    pub fn queue(self) -> QueueName {
        match self {
            TaskKind::SendEmail => QueueName::Email,
            TaskKind::SendSms | TaskKind::SendPushNotification | TaskKind::SendBookingReminder => {
                QueueName::Notification
            }
            TaskKind::ProcessPayment => QueueName::Payment,
            TaskKind::GenerateReport => QueueName::Report,
            TaskKind::CleanupSessions
            | TaskKind::SyncExternalData
            | TaskKind::UpdateActivityStats
            | TaskKind::ProcessImageUpload => QueueName::Maintenance,
        }
    }

    /// Worker slots contributed to the kind's queue when nothing is configured.
    ///
    /// Payment capture stays low: the gateway and the booking rows it touches
    /// have the strictest consistency requirements.
    pub fn default_concurrency(self) -> usize {
        match self {
            TaskKind::SendEmail => 5,
            TaskKind::SendSms => 3,
            TaskKind::SendPushNotification => 5,
            TaskKind::ProcessPayment => 2,
            TaskKind::ProcessImageUpload => 2,
            TaskKind::GenerateReport
            | TaskKind::CleanupSessions
            | TaskKind::SyncExternalData
            | TaskKind::UpdateActivityStats
            | TaskKind::SendBookingReminder => 1,
        }
    }

    /// Terminal failure of this kind moves (or fails to move) money.
    pub fn is_financial(self) -> bool {
        matches!(self, TaskKind::ProcessPayment)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind '{0}'")]
pub struct UnknownTaskKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

/// Cross-reference ids carried for logs and metrics. Never used for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl Correlation {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.booking_id.is_none() && self.activity_id.is_none()
    }
}

/// TaskId + Payload (+ correlation) の“運搬用”データ。
///
/// Consumers receive it by reference and never mutate it; side effects happen
/// in external systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    task_id: TaskId,
    payload: TaskPayload,
    #[serde(default, skip_serializing_if = "Correlation::is_empty")]
    correlation: Correlation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl TaskEnvelope {
    pub fn new(task_id: TaskId, payload: TaskPayload) -> Self {
        Self {
            task_id,
            payload,
            correlation: Correlation::default(),
            metadata: None,
        }
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }
}
