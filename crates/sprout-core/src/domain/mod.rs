//! Domain model (IDs, payloads, outcomes, marketplace records, ...).
//!
//! Nothing here knows about queues stores or workers, except [`Decider`]
//! which reads a [`TaskRecord`](crate::queue::TaskRecord).

pub mod booking;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod money;
pub mod outcome;
pub mod payload;
pub mod queue_name;
pub mod schedule;
pub mod task;

pub use booking::{
    ActivitySession, ActivityStats, Booking, BookingStatus, Payment, PaymentStatus, RefundRecord,
    ReminderTarget, Report,
};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, ProcessorError};
pub use events::{EventType, LifecycleEvent};
pub use ids::{ReportId, ScheduleId, TaskId};
pub use money::Money;
pub use outcome::{Artifact, Outcome, OutcomeKind};
pub use payload::{
    CleanupSessions, GenerateReport, PaymentAction, PayloadError, ProcessImageUpload,
    ProcessPayment, ReportType, SendBookingReminder, SendEmail, SendPushNotification, SendSms,
    SyncExternalData, TaskPayload, UpdateActivityStats,
};
pub use queue_name::{QueueName, UnknownQueue};
pub use schedule::{CronSchedule, InvalidCron};
pub use task::{Correlation, TaskEnvelope, TaskKind, UnknownTaskKind};
