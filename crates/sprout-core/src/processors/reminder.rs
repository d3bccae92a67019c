//! Booking reminders: fan out one `send-email` task per upcoming booking.
//!
//! Each email carries the dedupe key `reminder:{bookingId}`, so overlapping
//! runs (hourly schedule, 24h window) enqueue a booking's reminder once. The
//! booking is marked only after its email is enqueued; if any enqueue fails
//! the run is retried and the marked bookings drop out of the next window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::app::{Dispatcher, EnqueueOptions};
use crate::domain::{
    Artifact, Correlation, Outcome, ProcessorError, ReminderTarget, SendBookingReminder,
    SendEmail, TaskPayload,
};
use crate::ports::{BookingStore, Clock};
use crate::typed::{Handler, TaskContext};

pub const REMINDER_TEMPLATE: &str = "booking-reminder";

pub struct BookingReminderProcessor {
    bookings: Arc<dyn BookingStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl BookingReminderProcessor {
    pub fn new(bookings: Arc<dyn BookingStore>, dispatcher: Dispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            bookings,
            dispatcher,
            clock,
        }
    }
}

fn reminder_email(target: &ReminderTarget) -> SendEmail {
    let context = json!({
        "bookingId": target.booking.id,
        "activityTitle": target.activity_title,
        "startsAt": target.session.starts_at,
        "participants": target.booking.quantity,
    });
    SendEmail {
        to: target.parent_email.clone(),
        subject: format!("Reminder: {} starts soon", target.activity_title),
        template: REMINDER_TEMPLATE.to_string(),
        context: match context {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    }
}

#[async_trait]
impl Handler<SendBookingReminder> for BookingReminderProcessor {
    async fn handle(
        &self,
        task: SendBookingReminder,
        ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let now = self.clock.now();
        let until = now + Duration::hours(i64::from(task.window_hours()));
        let targets = self.bookings.reminder_targets(now, until).await?;

        let mut outcome = Outcome::done();
        let mut enqueued = 0usize;
        let mut failed = 0usize;
        for target in &targets {
            let booking = &target.booking;
            let options = EnqueueOptions::new()
                .dedupe_key(format!("reminder:{}", booking.id))
                .correlation(Correlation {
                    user_id: Some(booking.user_id.clone()),
                    booking_id: Some(booking.id.clone()),
                    activity_id: Some(booking.activity_id.clone()),
                });
            let payload = TaskPayload::SendEmail(reminder_email(target));
            match self.dispatcher.dispatch(payload, options).await {
                Ok(handle) => {
                    self.bookings.mark_reminded(&booking.id, now).await?;
                    if let Some(task_id) = handle.task_id() {
                        outcome = outcome.with_artifact(Artifact::Task(task_id.to_string()));
                    }
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(booking_id = %booking.id, task_id = %ctx.task_id, error = %e, "reminder email not enqueued");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(ProcessorError::transient(format!(
                "{failed} of {} reminder emails could not be enqueued",
                targets.len()
            )));
        }
        info!(enqueued, window_hours = task.window_hours(), "booking reminders enqueued");
        Ok(outcome.with_summary(format!("{enqueued} reminders enqueued")))
    }
}
