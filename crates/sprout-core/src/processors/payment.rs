//! Payment processor: capture and refund orchestration around the gateway.
//!
//! # Idempotency
//! Each task has a key, `payment:{bookingId}:{action}:{taskId}`. Retries and
//! stall requeues keep the task id, so with the guard on a re-run of a task
//! that already succeeded is skipped. The key is recorded after success and
//! passed to the gateway so a crash between the gateway call and the record
//! replays instead of charging or refunding twice. Separate refund tasks get
//! separate keys; producers that must not double-submit use a dedupe key at
//! enqueue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{
    Artifact, Booking, BookingStatus, Outcome, Payment, PaymentAction, PaymentStatus,
    ProcessPayment, ProcessorError, TaskId,
};
use crate::ports::{BookingStore, PaymentGateway, RefundRequest};
use crate::typed::{Handler, TaskContext};

pub fn idempotency_key(task: &ProcessPayment, task_id: TaskId) -> String {
    format!(
        "payment:{}:{}:{}",
        task.booking_id,
        task.action.as_str(),
        task_id.as_ulid()
    )
}

pub struct PaymentProcessor {
    gateway: Arc<dyn PaymentGateway>,
    bookings: Arc<dyn BookingStore>,
    idempotency_guard: bool,
}

impl PaymentProcessor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, bookings: Arc<dyn BookingStore>) -> Self {
        Self {
            gateway,
            bookings,
            idempotency_guard: true,
        }
    }

    pub fn with_idempotency_guard(mut self, enabled: bool) -> Self {
        self.idempotency_guard = enabled;
        self
    }

    async fn load(&self, booking_id: &str) -> Result<(Booking, Payment), ProcessorError> {
        let booking = self
            .bookings
            .booking(booking_id)
            .await?
            .ok_or_else(|| ProcessorError::permanent(format!("booking {booking_id} not found")))?;
        let payment = self
            .bookings
            .payment_for_booking(booking_id)
            .await?
            .ok_or_else(|| {
                ProcessorError::permanent(format!("no payment for booking {booking_id}"))
            })?;
        Ok((booking, payment))
    }

    async fn capture(
        &self,
        task: &ProcessPayment,
        payment: &Payment,
        intent_id: &str,
        key: Option<&str>,
    ) -> Result<Outcome, ProcessorError> {
        if payment.status == PaymentStatus::Succeeded {
            return Ok(Outcome::skipped("payment already captured"));
        }
        self.gateway.capture(intent_id, key).await?;
        self.bookings.confirm_capture(&task.booking_id).await?;
        info!(booking_id = %task.booking_id, intent_id, "payment captured, booking confirmed");
        Ok(Outcome::done().with_summary(format!("captured {}", payment.amount)))
    }

    async fn refund(
        &self,
        task: &ProcessPayment,
        booking: &Booking,
        payment: &Payment,
        intent_id: &str,
        key: Option<&str>,
    ) -> Result<Outcome, ProcessorError> {
        let refundable = payment.refundable();
        if !refundable.is_positive() {
            return Err(ProcessorError::permanent(format!(
                "booking {} has nothing left to refund",
                booking.id
            )));
        }
        let full = task.amount.is_none_or(|amount| amount >= refundable);
        let amount = match task.amount {
            Some(amount) if !full => amount,
            _ => refundable,
        };

        let request = RefundRequest {
            intent_id: intent_id.to_string(),
            amount: Some(amount),
            reason: task.reason.clone(),
        };
        let record = self.gateway.refund(&request, key).await?;
        let applied = self
            .bookings
            .apply_refund(&booking.id, &record, full)
            .await?;

        info!(
            booking_id = %booking.id,
            refund_id = %record.refund_id,
            amount = %record.amount,
            full,
            released_spots = applied.released_spots,
            payment_status = ?applied.payment.status,
            "refund applied"
        );
        let summary = if applied.booking_status == BookingStatus::Cancelled {
            format!(
                "refunded {}, booking cancelled, {} spots released",
                record.amount, applied.released_spots
            )
        } else {
            format!("refunded {} of {}", record.amount, payment.amount)
        };
        Ok(Outcome::done()
            .with_summary(summary)
            .with_artifact(Artifact::Record(record.refund_id)))
    }
}

#[async_trait]
impl Handler<ProcessPayment> for PaymentProcessor {
    async fn handle(
        &self,
        task: ProcessPayment,
        ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let key = idempotency_key(&task, ctx.task_id);
        if self.idempotency_guard && self.bookings.has_idempotency_key(&key).await? {
            return Ok(Outcome::skipped(format!("{key} already applied")));
        }
        let gateway_key = self.idempotency_guard.then_some(key.as_str());

        let (booking, payment) = self.load(&task.booking_id).await?;
        let intent_id = payment.intent_id.clone().ok_or_else(|| {
            ProcessorError::permanent(format!("payment {} has no gateway intent", payment.id))
        })?;

        let outcome = match task.action {
            PaymentAction::Process | PaymentAction::Capture => {
                self.capture(&task, &payment, &intent_id, gateway_key).await?
            }
            PaymentAction::Refund => {
                self.refund(&task, &booking, &payment, &intent_id, gateway_key)
                    .await?
            }
        };

        if self.idempotency_guard {
            self.bookings
                .record_idempotency_key(&key, &ctx.task_id.to_string())
                .await?;
        }
        Ok(outcome)
    }
}
