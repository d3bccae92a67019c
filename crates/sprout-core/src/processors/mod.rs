//! Processors - task kind ごとの処理本体
//!
//! 各 processor は `Handler<T>` を実装し、外部システムには ports 経由でのみ触ります。
//! `register_defaults` が 10 種類すべてを `AppBuilder` に登録します。
//!
//! # 冪等性
//! - delivery: 再送はありうる（at-least-once）
//! - payment: idempotency key で二重 capture / refund を防ぐ
//! - report: 実行ごとに新しい report id
//! - maintenance: 同じ入力で再実行しても結果は同じ
//! - reminder: `reminder:{bookingId}` の dedupe key

pub mod delivery;
pub mod maintenance;
pub mod payment;
pub mod reminder;
pub mod report;

use std::sync::Arc;

pub use self::delivery::{EmailProcessor, PushProcessor, SmsProcessor};
pub use self::maintenance::{
    ActivityStatsProcessor, CleanupSessionsProcessor, ImageUploadProcessor,
    SyncExternalDataProcessor,
};
pub use self::payment::PaymentProcessor;
pub use self::reminder::BookingReminderProcessor;
pub use self::report::ReportProcessor;

use crate::app::AppBuilder;
use crate::domain::{
    CleanupSessions, GenerateReport, ProcessImageUpload, ProcessPayment, SendBookingReminder,
    SendEmail, SendPushNotification, SendSms, SyncExternalData, UpdateActivityStats,
};
use crate::impls::{
    InMemoryDatabase, LogMailer, LogPush, LogSms, PassthroughImagePipeline, SandboxGateway,
    StaticExternalSync,
};
use crate::ports::{
    AnalyticsStore, BookingStore, CatalogStore, ExternalSync, ImagePipeline, Mailer,
    PaymentGateway, PushSender, SessionStore, SmsSender,
};
use crate::typed::RegistryError;

/// External collaborators the processors talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub mailer: Arc<dyn Mailer>,
    pub sms: Arc<dyn SmsSender>,
    pub push: Arc<dyn PushSender>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub bookings: Arc<dyn BookingStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub external: Arc<dyn ExternalSync>,
    pub images: Arc<dyn ImagePipeline>,
}

impl Collaborators {
    /// Logging transports, a sandbox gateway and one in-process database
    /// behind every persistence port.
    pub fn in_memory(db: Arc<InMemoryDatabase>, gateway: Arc<SandboxGateway>) -> Self {
        Self {
            mailer: Arc::new(LogMailer::new()),
            sms: Arc::new(LogSms::new()),
            push: Arc::new(LogPush::new()),
            gateway,
            bookings: db.clone(),
            analytics: db.clone(),
            sessions: db.clone(),
            catalog: db,
            external: Arc::new(StaticExternalSync::new()),
            images: Arc::new(PassthroughImagePipeline::default()),
        }
    }
}

/// Register one processor per task kind.
///
/// # Errors
///
/// `AlreadyRegistered` when the builder already has a processor for a kind.
pub fn register_defaults(
    builder: AppBuilder,
    collab: &Collaborators,
) -> Result<AppBuilder, RegistryError> {
    let clock = Arc::clone(&builder.infrastructure().clock);
    let ids = Arc::clone(&builder.infrastructure().ids);
    let dispatcher = builder.dispatcher();
    let idempotency_guard = builder.config().payments.idempotency_guard;

    builder
        .register::<SendEmail, _>(EmailProcessor::new(Arc::clone(&collab.mailer)))?
        .register::<SendSms, _>(SmsProcessor::new(Arc::clone(&collab.sms)))?
        .register::<SendPushNotification, _>(PushProcessor::new(Arc::clone(&collab.push)))?
        .register::<ProcessPayment, _>(
            PaymentProcessor::new(Arc::clone(&collab.gateway), Arc::clone(&collab.bookings))
                .with_idempotency_guard(idempotency_guard),
        )?
        .register::<GenerateReport, _>(ReportProcessor::new(
            Arc::clone(&collab.bookings),
            Arc::clone(&collab.analytics),
            Arc::clone(&clock),
            ids,
        ))?
        .register::<CleanupSessions, _>(CleanupSessionsProcessor::new(
            Arc::clone(&collab.sessions),
            Arc::clone(&clock),
        ))?
        .register::<SyncExternalData, _>(SyncExternalDataProcessor::new(
            Arc::clone(&collab.external),
            Arc::clone(&collab.catalog),
            Arc::clone(&clock),
        ))?
        .register::<UpdateActivityStats, _>(ActivityStatsProcessor::new(
            Arc::clone(&collab.bookings),
            Arc::clone(&collab.analytics),
        ))?
        .register::<SendBookingReminder, _>(BookingReminderProcessor::new(
            Arc::clone(&collab.bookings),
            dispatcher,
            clock,
        ))?
        .register::<ProcessImageUpload, _>(ImageUploadProcessor::new(
            Arc::clone(&collab.images),
            Arc::clone(&collab.catalog),
        ))
}
