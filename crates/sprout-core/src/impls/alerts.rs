use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{error, warn};

use crate::ports::{AlertSink, OperatorAlert, Severity};

/// Logs alerts at WARN/ERROR and keeps them for inspection.
#[derive(Default)]
pub struct LogAlertSink {
    raised: Mutex<Vec<OperatorAlert>>,
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<OperatorAlert> {
        self.raised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, alert: OperatorAlert) {
        let task_id = alert.task_id.to_string();
        let booking_id = alert.correlation.booking_id.as_deref().unwrap_or_default();
        match alert.severity {
            Severity::Critical => error!(
                queue = alert.queue.as_str(),
                kind = alert.kind.as_str(),
                task_id = task_id.as_str(),
                booking_id,
                attempts = alert.attempts,
                detail = %alert.detail,
                "OPERATOR ALERT: {}",
                alert.title
            ),
            Severity::Warning => warn!(
                queue = alert.queue.as_str(),
                kind = alert.kind.as_str(),
                task_id = task_id.as_str(),
                booking_id,
                attempts = alert.attempts,
                detail = %alert.detail,
                "operator alert: {}",
                alert.title
            ),
        }
        self.raised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert);
    }
}
