//! InMemoryDatabase - 開発・テスト用のマーケットプレイス DB
//!
//! 全 persistence port を 1 つの `Mutex` の下で実装します。1 回の呼び出しは
//! 1 回のロックで完結するので、`reserve_spots` / `release_spots` /
//! `apply_refund` は互いに atomic です（更新の取りこぼしなし）。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ActivitySession, ActivityStats, Booking, BookingStatus, Payment, PaymentStatus, RefundRecord,
    ReminderTarget, Report, ReportId,
};
use crate::ports::{
    AnalyticsStore, BookingStore, CatalogStore, ExternalRecord, ImageVariant, PersistenceError,
    RefundApplied, SessionStore,
};

#[derive(Default)]
struct DbState {
    bookings: BTreeMap<String, Booking>,
    /// booking id -> payment
    payments: HashMap<String, Payment>,
    sessions: HashMap<String, ActivitySession>,
    activity_titles: HashMap<String, String>,
    parent_emails: HashMap<String, String>,
    applied_refunds: HashSet<String>,
    idempotency_keys: HashMap<String, String>,
    activity_stats: HashMap<String, ActivityStats>,
    reports: HashMap<ReportId, Report>,
    /// auth session id -> expires at
    auth_sessions: HashMap<String, DateTime<Utc>>,
    external: BTreeMap<(String, String), ExternalRecord>,
    last_synced: HashMap<String, DateTime<Utc>>,
    image_variants: HashMap<String, Vec<ImageVariant>>,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    state: Mutex<DbState>,
}

fn not_found(entity: &'static str, id: &str) -> PersistenceError {
    PersistenceError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.state
            .lock()
            .await
            .bookings
            .insert(booking.id.clone(), booking);
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.state
            .lock()
            .await
            .payments
            .insert(payment.booking_id.clone(), payment);
    }

    pub async fn insert_session(&self, session: ActivitySession) {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), session);
    }

    pub async fn set_activity_title(&self, activity_id: &str, title: &str) {
        self.state
            .lock()
            .await
            .activity_titles
            .insert(activity_id.to_string(), title.to_string());
    }

    pub async fn set_parent_email(&self, user_id: &str, email: &str) {
        self.state
            .lock()
            .await
            .parent_emails
            .insert(user_id.to_string(), email.to_string());
    }

    pub async fn insert_auth_session(&self, id: &str, expires_at: DateTime<Utc>) {
        self.state
            .lock()
            .await
            .auth_sessions
            .insert(id.to_string(), expires_at);
    }

    pub async fn auth_session_count(&self) -> usize {
        self.state.lock().await.auth_sessions.len()
    }

    pub async fn external_record(&self, source: &str, external_id: &str) -> Option<ExternalRecord> {
        self.state
            .lock()
            .await
            .external
            .get(&(source.to_string(), external_id.to_string()))
            .cloned()
    }

    pub async fn image_variants(&self, upload_id: &str) -> Vec<ImageVariant> {
        self.state
            .lock()
            .await
            .image_variants
            .get(upload_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.state.lock().await.reports.values().cloned().collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryDatabase {
    async fn booking(&self, id: &str) -> Result<Option<Booking>, PersistenceError> {
        Ok(self.state.lock().await.bookings.get(id).cloned())
    }

    async fn payment_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Option<Payment>, PersistenceError> {
        Ok(self.state.lock().await.payments.get(booking_id).cloned())
    }

    async fn session(&self, id: &str) -> Result<Option<ActivitySession>, PersistenceError> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn confirm_capture(&self, booking_id: &str) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let booking = state
            .bookings
            .get_mut(booking_id)
            .ok_or_else(|| not_found("booking", booking_id))?;
        let payment = state
            .payments
            .get_mut(booking_id)
            .ok_or_else(|| not_found("payment", booking_id))?;
        payment.status = PaymentStatus::Succeeded;
        booking.status = BookingStatus::Confirmed;
        Ok(())
    }

    async fn apply_refund(
        &self,
        booking_id: &str,
        refund: &RefundRecord,
        full: bool,
    ) -> Result<RefundApplied, PersistenceError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let booking = state
            .bookings
            .get_mut(booking_id)
            .ok_or_else(|| not_found("booking", booking_id))?;
        let payment = state
            .payments
            .get_mut(booking_id)
            .ok_or_else(|| not_found("payment", booking_id))?;

        if !state.applied_refunds.insert(refund.refund_id.clone()) {
            return Ok(RefundApplied {
                payment: payment.clone(),
                booking_status: booking.status,
                released_spots: 0,
                duplicate: true,
            });
        }

        payment.refund_amount = payment.refund_amount + refund.amount;
        let mut released_spots = 0;
        if full || !payment.refundable().is_positive() {
            payment.status = PaymentStatus::Refunded;
            if booking.status != BookingStatus::Cancelled {
                booking.status = BookingStatus::Cancelled;
                if let Some(session) = state.sessions.get_mut(&booking.session_id) {
                    let before = session.available_spots;
                    session.available_spots = session
                        .available_spots
                        .saturating_add(booking.quantity)
                        .min(session.capacity);
                    released_spots = session.available_spots - before;
                }
            }
        } else {
            payment.status = PaymentStatus::PartiallyRefunded;
        }

        Ok(RefundApplied {
            payment: payment.clone(),
            booking_status: booking.status,
            released_spots,
            duplicate: false,
        })
    }

    async fn reserve_spots(&self, session_id: &str, spots: u32) -> Result<u32, PersistenceError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        if session.available_spots < spots {
            return Err(PersistenceError::InsufficientCapacity {
                session_id: session_id.to_string(),
                requested: spots,
                available: session.available_spots,
            });
        }
        session.available_spots -= spots;
        Ok(session.available_spots)
    }

    async fn release_spots(&self, session_id: &str, spots: u32) -> Result<u32, PersistenceError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        session.available_spots = session
            .available_spots
            .saturating_add(spots)
            .min(session.capacity);
        Ok(session.available_spots)
    }

    async fn reminder_targets(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReminderTarget>, PersistenceError> {
        let state = self.state.lock().await;
        let targets = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.reminded_at.is_none())
            .filter_map(|b| {
                let session = state.sessions.get(&b.session_id)?;
                if session.starts_at < from || session.starts_at >= to {
                    return None;
                }
                Some(ReminderTarget {
                    booking: b.clone(),
                    session: session.clone(),
                    activity_title: state
                        .activity_titles
                        .get(&b.activity_id)
                        .cloned()
                        .unwrap_or_else(|| b.activity_id.clone()),
                    parent_email: state.parent_emails.get(&b.user_id).cloned()?,
                })
            })
            .collect();
        Ok(targets)
    }

    async fn mark_reminded(
        &self,
        booking_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(booking_id)
            .ok_or_else(|| not_found("booking", booking_id))?;
        booking.reminded_at = Some(at);
        Ok(())
    }

    async fn bookings_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.created_at >= from && b.created_at < to)
            .cloned()
            .collect())
    }

    async fn bookings_for_activity(
        &self,
        activity_id: &str,
    ) -> Result<Vec<Booking>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.activity_id == activity_id)
            .cloned()
            .collect())
    }

    async fn activity_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<String> = state
            .bookings
            .values()
            .map(|b| b.activity_id.clone())
            .chain(state.sessions.values().map(|s| s.activity_id.clone()))
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn has_idempotency_key(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.state.lock().await.idempotency_keys.contains_key(key))
    }

    async fn record_idempotency_key(
        &self,
        key: &str,
        task_id: &str,
    ) -> Result<(), PersistenceError> {
        self.state
            .lock()
            .await
            .idempotency_keys
            .entry(key.to_string())
            .or_insert_with(|| task_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryDatabase {
    async fn save_activity_stats(&self, stats: &ActivityStats) -> Result<(), PersistenceError> {
        self.state
            .lock()
            .await
            .activity_stats
            .insert(stats.activity_id.clone(), stats.clone());
        Ok(())
    }

    async fn activity_stats(
        &self,
        activity_id: &str,
    ) -> Result<Option<ActivityStats>, PersistenceError> {
        Ok(self.state.lock().await.activity_stats.get(activity_id).cloned())
    }

    async fn save_report(&self, report: &Report) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        if state.reports.contains_key(&report.id) {
            return Err(PersistenceError::Conflict(format!(
                "report {} already exists",
                report.id
            )));
        }
        state.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn report(&self, id: ReportId) -> Result<Option<Report>, PersistenceError> {
        Ok(self.state.lock().await.reports.get(&id).cloned())
    }
}

#[async_trait]
impl SessionStore for InMemoryDatabase {
    async fn delete_expired_sessions(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let mut state = self.state.lock().await;
        let count = state.auth_sessions.len();
        state.auth_sessions.retain(|_, expires_at| *expires_at >= before);
        Ok((count - state.auth_sessions.len()) as u64)
    }
}

#[async_trait]
impl CatalogStore for InMemoryDatabase {
    async fn upsert_external(&self, record: &ExternalRecord) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let key = (record.source.clone(), record.external_id.clone());
        if state.external.get(&key) == Some(record) {
            return Ok(false);
        }
        state.external.insert(key, record.clone());
        Ok(true)
    }

    async fn last_synced(&self, source: &str) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        Ok(self.state.lock().await.last_synced.get(source).copied())
    }

    async fn set_last_synced(
        &self,
        source: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.state
            .lock()
            .await
            .last_synced
            .insert(source.to_string(), at);
        Ok(())
    }

    async fn save_image_variants(
        &self,
        upload_id: &str,
        variants: &[ImageVariant],
    ) -> Result<(), PersistenceError> {
        self.state
            .lock()
            .await
            .image_variants
            .insert(upload_id.to_string(), variants.to_vec());
        Ok(())
    }
}
