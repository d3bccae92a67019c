//! Task payloads: one strongly typed struct per [`TaskKind`].
//!
//! On the wire a payload is an internally tagged object:
//! `{"kind": "process-payment", "bookingId": "B1", "action": "refund", "amount": 10.0}`.
//! Structural problems (missing fields, wrong types) fail deserialization;
//! semantic problems fail [`TaskPayload::validate`] at enqueue time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Money, TaskKind};

type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskPayload {
    SendEmail(SendEmail),
    SendSms(SendSms),
    SendPushNotification(SendPushNotification),
    ProcessPayment(ProcessPayment),
    GenerateReport(GenerateReport),
    CleanupSessions(CleanupSessions),
    SyncExternalData(SyncExternalData),
    UpdateActivityStats(UpdateActivityStats),
    SendBookingReminder(SendBookingReminder),
    ProcessImageUpload(ProcessImageUpload),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} payload: {reason}")]
pub struct PayloadError {
    pub kind: TaskKind,
    pub reason: String,
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::SendEmail(_) => TaskKind::SendEmail,
            TaskPayload::SendSms(_) => TaskKind::SendSms,
            TaskPayload::SendPushNotification(_) => TaskKind::SendPushNotification,
            TaskPayload::ProcessPayment(_) => TaskKind::ProcessPayment,
            TaskPayload::GenerateReport(_) => TaskKind::GenerateReport,
            TaskPayload::CleanupSessions(_) => TaskKind::CleanupSessions,
            TaskPayload::SyncExternalData(_) => TaskKind::SyncExternalData,
            TaskPayload::UpdateActivityStats(_) => TaskKind::UpdateActivityStats,
            TaskPayload::SendBookingReminder(_) => TaskKind::SendBookingReminder,
            TaskPayload::ProcessImageUpload(_) => TaskKind::ProcessImageUpload,
        }
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        let checked = match self {
            TaskPayload::SendEmail(p) => p.validate(),
            TaskPayload::SendSms(p) => p.validate(),
            TaskPayload::SendPushNotification(p) => p.validate(),
            TaskPayload::ProcessPayment(p) => p.validate(),
            TaskPayload::GenerateReport(p) => p.validate(),
            TaskPayload::CleanupSessions(_) | TaskPayload::UpdateActivityStats(_) => Ok(()),
            TaskPayload::SyncExternalData(p) => p.validate(),
            TaskPayload::SendBookingReminder(p) => p.validate(),
            TaskPayload::ProcessImageUpload(p) => p.validate(),
        };
        checked.map_err(|reason| PayloadError {
            kind: self.kind(),
            reason,
        })
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmail {
    pub to: String,
    pub subject: String,
    pub template: String,
    #[serde(default)]
    pub context: JsonMap,
}

impl SendEmail {
    fn validate(&self) -> Result<(), String> {
        match self.to.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(format!("'{}' is not an email address", self.to)),
        }
        require("subject", &self.subject)?;
        require("template", &self.template)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSms {
    pub to: String,
    pub message: String,
}

impl SendSms {
    const MAX_LEN: usize = 1600;

    fn validate(&self) -> Result<(), String> {
        let digits = self.to.chars().filter(char::is_ascii_digit).count();
        let allowed = self
            .to
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'));
        if !allowed || digits < 6 {
            return Err(format!("'{}' is not a phone number", self.to));
        }
        require("message", &self.message)?;
        if self.message.chars().count() > Self::MAX_LEN {
            return Err(format!("message exceeds {} characters", Self::MAX_LEN));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPushNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl SendPushNotification {
    fn validate(&self) -> Result<(), String> {
        require("userId", &self.user_id)?;
        require("title", &self.title)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentAction {
    /// Capture an authorized payment (alias kept for producers using the
    /// checkout wording).
    Process,
    Capture,
    Refund,
}

impl PaymentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentAction::Process => "process",
            PaymentAction::Capture => "capture",
            PaymentAction::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayment {
    pub booking_id: String,
    pub action: PaymentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProcessPayment {
    fn validate(&self) -> Result<(), String> {
        require("bookingId", &self.booking_id)?;
        match (self.action, self.amount) {
            (PaymentAction::Refund, Some(amount)) if !amount.is_positive() => {
                Err(format!("refund amount must be positive, got {amount}"))
            }
            (PaymentAction::Process | PaymentAction::Capture, Some(_)) => {
                Err("amount is only accepted for refunds".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    ActivityStats,
    RevenueReport,
    UserEngagement,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::ActivityStats => "activity-stats",
            ReportType::RevenueReport => "revenue-report",
            ReportType::UserEngagement => "user-engagement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl GenerateReport {
    fn validate(&self) -> Result<(), String> {
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from >= to
        {
            return Err(format!("report window is empty ({from} .. {to})"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSessions {
    /// Grace period after expiry before a session row is deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncExternalData {
    pub source: String,
}

impl SyncExternalData {
    fn validate(&self) -> Result<(), String> {
        require("source", &self.source)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActivityStats {
    /// `None` recomputes every activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBookingReminder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_hours: Option<u32>,
}

impl SendBookingReminder {
    pub const DEFAULT_WINDOW_HOURS: u32 = 24;

    pub fn window_hours(&self) -> u32 {
        self.window_hours.unwrap_or(Self::DEFAULT_WINDOW_HOURS)
    }

    fn validate(&self) -> Result<(), String> {
        match self.window_hours {
            Some(h) if !(1..=168).contains(&h) => {
                Err(format!("windowHours must be within 1..=168, got {h}"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImageUpload {
    pub upload_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

impl ProcessImageUpload {
    fn validate(&self) -> Result<(), String> {
        require("uploadId", &self.upload_id)?;
        require("userId", &self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn payment_payload_reads_wire_shape() {
        let payload: TaskPayload = serde_json::from_value(json!({
            "kind": "process-payment",
            "bookingId": "B1",
            "action": "refund",
            "amount": 10.00
        }))
        .unwrap();

        assert_eq!(payload.kind(), TaskKind::ProcessPayment);
        let TaskPayload::ProcessPayment(p) = payload else {
            panic!("expected payment payload");
        };
        assert_eq!(p.booking_id, "B1");
        assert_eq!(p.action, PaymentAction::Refund);
        assert_eq!(p.amount, Some(Money::from_minor(1000)));
    }

    #[test]
    fn report_type_uses_type_key() {
        let payload: TaskPayload = serde_json::from_value(json!({
            "kind": "generate-report",
            "type": "revenue-report"
        }))
        .unwrap();
        let TaskPayload::GenerateReport(r) = payload else {
            panic!("expected report payload");
        };
        assert_eq!(r.report_type, ReportType::RevenueReport);
        assert!(r.from.is_none());
    }

    #[test]
    fn missing_fields_fail_structurally() {
        let res = serde_json::from_value::<TaskPayload>(json!({
            "kind": "send-email",
            "to": "a@example.com"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn empty_payloads_deserialize_for_optional_kinds() {
        let payload: TaskPayload =
            serde_json::from_value(json!({ "kind": "cleanup-sessions" })).unwrap();
        assert_eq!(payload, TaskPayload::CleanupSessions(CleanupSessions::default()));
    }

    fn email(to: &str) -> TaskPayload {
        TaskPayload::SendEmail(SendEmail {
            to: to.to_string(),
            subject: "Hi".to_string(),
            template: "welcome".to_string(),
            context: JsonMap::new(),
        })
    }

    fn refund(amount: Option<i64>) -> TaskPayload {
        TaskPayload::ProcessPayment(ProcessPayment {
            booking_id: "B1".to_string(),
            action: PaymentAction::Refund,
            amount: amount.map(Money::from_minor),
            reason: None,
        })
    }

    #[rstest]
    #[case::good_email(email("parent@example.com"), true)]
    #[case::bad_email(email("parent"), false)]
    #[case::full_refund(refund(None), true)]
    #[case::partial_refund(refund(Some(1000)), true)]
    #[case::zero_refund(refund(Some(0)), false)]
    #[case::short_phone(TaskPayload::SendSms(SendSms { to: "12".into(), message: "x".into() }), false)]
    #[case::phone(TaskPayload::SendSms(SendSms { to: "+254 700 000000".into(), message: "x".into() }), true)]
    #[case::wide_window(TaskPayload::SendBookingReminder(SendBookingReminder { window_hours: Some(500) }), false)]
    fn validation_cases(#[case] payload: TaskPayload, #[case] ok: bool) {
        assert_eq!(payload.validate().is_ok(), ok, "{payload:?}");
    }

    #[test]
    fn capture_rejects_amount() {
        let payload = TaskPayload::ProcessPayment(ProcessPayment {
            booking_id: "B1".to_string(),
            action: PaymentAction::Capture,
            amount: Some(Money::from_minor(100)),
            reason: None,
        });
        let err = payload.validate().unwrap_err();
        assert_eq!(err.kind, TaskKind::ProcessPayment);
        assert!(err.reason.contains("only accepted for refunds"));
    }
}
