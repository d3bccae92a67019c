//! Persistence ports over the marketplace database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    ActivitySession, ActivityStats, Booking, BookingStatus, Payment, ProcessorError, RefundRecord,
    ReminderTarget, Report, ReportId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("session {session_id} has {available} spots left, {requested} requested")]
    InsufficientCapacity {
        session_id: String,
        requested: u32,
        available: u32,
    },

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<PersistenceError> for ProcessorError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Unavailable(_) => ProcessorError::transient(e.to_string()),
            PersistenceError::NotFound { .. }
            | PersistenceError::InsufficientCapacity { .. }
            | PersistenceError::Conflict(_) => ProcessorError::permanent(e.to_string()),
        }
    }
}

/// Result of writing a refund back to the booking side.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundApplied {
    pub payment: Payment,
    pub booking_status: BookingStatus,
    /// Spots handed back to the session (0 for partial refunds).
    pub released_spots: u32,
    /// The refund id was already applied; nothing changed.
    pub duplicate: bool,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn booking(&self, id: &str) -> Result<Option<Booking>, PersistenceError>;

    async fn payment_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Option<Payment>, PersistenceError>;

    async fn session(&self, id: &str) -> Result<Option<ActivitySession>, PersistenceError>;

    /// Payment SUCCEEDED and booking CONFIRMED, in one write.
    async fn confirm_capture(&self, booking_id: &str) -> Result<(), PersistenceError>;

    /// Accumulate the refund on the payment. A full refund also cancels the
    /// booking and releases its spots. Keyed by `refund.refund_id`, so
    /// applying the same refund twice changes nothing.
    async fn apply_refund(
        &self,
        booking_id: &str,
        refund: &RefundRecord,
        full: bool,
    ) -> Result<RefundApplied, PersistenceError>;

    /// Atomic decrement of `available_spots`; returns what is left.
    async fn reserve_spots(&self, session_id: &str, spots: u32) -> Result<u32, PersistenceError>;

    /// Atomic increment of `available_spots`, capped at capacity.
    async fn release_spots(&self, session_id: &str, spots: u32) -> Result<u32, PersistenceError>;

    /// CONFIRMED bookings whose session starts in `[from, to)` and that have
    /// not been reminded yet.
    async fn reminder_targets(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReminderTarget>, PersistenceError>;

    async fn mark_reminded(&self, booking_id: &str, at: DateTime<Utc>)
    -> Result<(), PersistenceError>;

    async fn bookings_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, PersistenceError>;

    async fn bookings_for_activity(
        &self,
        activity_id: &str,
    ) -> Result<Vec<Booking>, PersistenceError>;

    async fn activity_ids(&self) -> Result<Vec<String>, PersistenceError>;

    async fn has_idempotency_key(&self, key: &str) -> Result<bool, PersistenceError>;

    async fn record_idempotency_key(&self, key: &str, task_id: &str)
    -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Overwrites whatever was stored for the activity.
    async fn save_activity_stats(&self, stats: &ActivityStats) -> Result<(), PersistenceError>;

    async fn activity_stats(
        &self,
        activity_id: &str,
    ) -> Result<Option<ActivityStats>, PersistenceError>;

    /// Reports are immutable; saving an existing id is a conflict.
    async fn save_report(&self, report: &Report) -> Result<(), PersistenceError>;

    async fn report(&self, id: ReportId) -> Result<Option<Report>, PersistenceError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Deletes auth sessions that expired before `before`; returns how many.
    async fn delete_expired_sessions(&self, before: DateTime<Utc>)
    -> Result<u64, PersistenceError>;
}

/// A record pulled from a partner system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRecord {
    pub source: String,
    pub external_id: String,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageVariant {
    pub name: String,
    pub url: String,
}

/// Listing-side data fed by integrations.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or replace by `(source, external_id)`. Returns whether anything changed.
    async fn upsert_external(&self, record: &ExternalRecord) -> Result<bool, PersistenceError>;

    async fn last_synced(&self, source: &str) -> Result<Option<DateTime<Utc>>, PersistenceError>;

    async fn set_last_synced(
        &self,
        source: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn save_image_variants(
        &self,
        upload_id: &str,
        variants: &[ImageVariant],
    ) -> Result<(), PersistenceError>;
}
