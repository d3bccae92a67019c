#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sprout_core::app::{AppBuilder, Infrastructure};
use sprout_core::config::{BackendKind, QueueConfig, SproutConfig};
use sprout_core::domain::{
    ActivitySession, Booking, BookingStatus, Money, Payment, PaymentStatus, QueueName, TaskId,
};
use sprout_core::impls::{
    BroadcastEventSink, InMemoryDatabase, LogAlertSink, LogMailer, LogPush, LogSms,
    PassthroughImagePipeline, SandboxGateway, StaticExternalSync,
};
use sprout_core::ports::{Clock, SystemClock, UlidGenerator};
use sprout_core::processors::Collaborators;
use sprout_core::queue::{InMemoryQueueStore, QueueStore, TaskRecord, TaskState};

/// Millisecond-scale timings so tests finish quickly.
pub fn fast_config() -> SproutConfig {
    let mut config = SproutConfig::default();
    config.store.backend = BackendKind::Memory;
    config.store.poll_interval_ms = 10;
    config.workers.heartbeat_interval_ms = 20;
    config.workers.stall_timeout_ms = 300;
    config.workers.stall_check_interval_ms = 50;
    config.workers.shutdown_grace_ms = 2000;
    for queue in QueueName::ALL {
        config.queues.insert(
            queue,
            QueueConfig {
                backoff_ms: 50,
                ..QueueConfig::default()
            },
        );
    }
    config
}

pub struct Harness {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn QueueStore>,
    pub events: Arc<BroadcastEventSink>,
    pub alerts: Arc<LogAlertSink>,
    pub db: Arc<InMemoryDatabase>,
    pub gateway: Arc<SandboxGateway>,
    pub mailer: Arc<LogMailer>,
}

impl Harness {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new(Arc::clone(&clock)));
        Self::with_store(clock, store)
    }

    pub fn with_store(clock: Arc<dyn Clock>, store: Arc<dyn QueueStore>) -> Self {
        Self {
            clock,
            store,
            events: Arc::new(BroadcastEventSink::default()),
            alerts: Arc::new(LogAlertSink::new()),
            db: Arc::new(InMemoryDatabase::new()),
            gateway: Arc::new(SandboxGateway::new()),
            mailer: Arc::new(LogMailer::new()),
        }
    }

    pub fn infrastructure(&self) -> Infrastructure {
        Infrastructure {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
            events: self.events.clone(),
            alerts: self.alerts.clone(),
        }
    }

    pub fn builder(&self, config: SproutConfig) -> AppBuilder {
        AppBuilder::new(config, self.infrastructure())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            mailer: self.mailer.clone(),
            sms: Arc::new(LogSms::new()),
            push: Arc::new(LogPush::new()),
            gateway: self.gateway.clone(),
            bookings: self.db.clone(),
            analytics: self.db.clone(),
            sessions: self.db.clone(),
            catalog: self.db.clone(),
            external: Arc::new(StaticExternalSync::new()),
            images: Arc::new(PassthroughImagePipeline::default()),
        }
    }

    /// Booking `B1` for 3 participants on session `S1` (capacity 10, 5 left),
    /// paid 20.00 through intent `pi_1`.
    pub async fn seed_paid_booking(&self) {
        let now = Utc::now();
        self.db
            .insert_session(ActivitySession {
                id: "S1".into(),
                activity_id: "A1".into(),
                starts_at: now + chrono::Duration::days(3),
                capacity: 10,
                available_spots: 5,
            })
            .await;
        self.db
            .insert_booking(Booking {
                id: "B1".into(),
                user_id: "U1".into(),
                activity_id: "A1".into(),
                session_id: "S1".into(),
                quantity: 3,
                total: Money::from_minor(2000),
                status: BookingStatus::Confirmed,
                created_at: now,
                reminded_at: None,
            })
            .await;
        self.db
            .insert_payment(Payment {
                id: "P1".into(),
                booking_id: "B1".into(),
                amount: Money::from_minor(2000),
                status: PaymentStatus::Succeeded,
                intent_id: Some("pi_1".into()),
                refund_amount: Money::ZERO,
            })
            .await;
        self.gateway.add_intent("pi_1", Money::from_minor(2000));
    }
}

/// Poll until the task reaches a terminal state.
pub async fn wait_finished(
    store: &dyn QueueStore,
    queue: QueueName,
    id: TaskId,
    within: Duration,
) -> TaskRecord {
    let poll = async {
        loop {
            if let Ok(Some(record)) = store.get(queue, id).await
                && matches!(record.state, TaskState::Completed | TaskState::Failed)
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(within, poll)
        .await
        .unwrap_or_else(|_| panic!("task {id} on {queue} did not finish within {within:?}"))
}
