//! Marketplace records the processors read and update.
//!
//! Only the fields the background layer touches are modelled; the relational
//! schema behind them belongs to the web application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Money, ReportId, ReportType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub activity_id: String,
    pub session_id: String,
    pub quantity: u32,
    pub total: Money,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    PartiallyRefunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub booking_id: String,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Gateway-side intent created (and authorized) by the checkout flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(default)]
    pub refund_amount: Money,
}

impl Payment {
    /// Amount that can still be refunded.
    pub fn refundable(&self) -> Money {
        self.amount - self.refund_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySession {
    pub id: String,
    pub activity_id: String,
    pub starts_at: DateTime<Utc>,
    pub capacity: u32,
    pub available_spots: u32,
}

/// A confirmed booking about to start, with what the reminder email needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderTarget {
    pub booking: Booking,
    pub session: ActivitySession,
    pub activity_title: String,
    pub parent_email: String,
}

/// Derived per-activity numbers. Recomputed from scratch on every run, so
/// it carries no timestamp and two runs on unchanged data compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub activity_id: String,
    pub total_bookings: u64,
    pub confirmed_bookings: u64,
    pub cancelled_bookings: u64,
    pub participants: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRecord {
    pub refund_id: String,
    pub intent_id: String,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_use_upper_snake_case() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::PartiallyRefunded).unwrap(),
            "\"PARTIALLY_REFUNDED\""
        );
        assert_eq!(
            serde_json::to_string(&BookingStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
    }

    #[test]
    fn refundable_subtracts_previous_refunds() {
        let p = Payment {
            id: "P1".into(),
            booking_id: "B1".into(),
            amount: Money::from_minor(2000),
            status: PaymentStatus::PartiallyRefunded,
            intent_id: Some("pi_1".into()),
            refund_amount: Money::from_minor(500),
        };
        assert_eq!(p.refundable(), Money::from_minor(1500));
    }
}
