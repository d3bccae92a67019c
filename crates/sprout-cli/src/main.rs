//! sprout-worker: runs every task queue of the marketplace in one process.
//!
//! Transports, gateway and database are the in-process development
//! implementations; `--demo` seeds a booking and enqueues a few tasks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use sprout_core::app::{AppBuilder, DispatchResultExt, Dispatcher, EnqueueOptions, Infrastructure};
use sprout_core::config::SproutConfig;
use sprout_core::domain::{
    ActivitySession, Booking, BookingStatus, Correlation, GenerateReport, Money, Payment,
    PaymentAction, PaymentStatus, ProcessPayment, ReportType, SendEmail, SendSms, TaskKind,
    TaskPayload, UpdateActivityStats,
};
use sprout_core::impls::{InMemoryDatabase, LogAlertSink, SandboxGateway, TracingEventSink};
use sprout_core::observability::init_tracing;
use sprout_core::ports::{Clock, SystemClock, UlidGenerator};
use sprout_core::processors::{Collaborators, register_defaults};
use sprout_core::queue::connect_store;

#[derive(Debug, Parser)]
#[command(name = "sprout-worker", about = "Sprout background task workers")]
struct Args {
    /// Configuration file; `config/sprout.toml` when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed sample data and enqueue a handful of tasks after startup.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = SproutConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config, Arc::clone(&clock)).await;
    let infra = Infrastructure {
        store,
        ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        clock: Arc::clone(&clock),
        events: Arc::new(TracingEventSink),
        alerts: Arc::new(LogAlertSink::new()),
    };

    let db = Arc::new(InMemoryDatabase::new());
    let gateway = Arc::new(SandboxGateway::new());
    let collaborators = Collaborators::in_memory(Arc::clone(&db), Arc::clone(&gateway));

    let service = register_defaults(AppBuilder::new(config, infra), &collaborators)?
        .expect_tasks(&TaskKind::ALL)
        .build()?;
    let running = service.start().await;
    for (queue, slots) in running.pool_sizes() {
        info!(queue = %queue, slots, "queue ready");
    }

    if args.demo {
        seed_demo(&db, &gateway, clock.as_ref()).await;
        enqueue_demo(&running.dispatcher()).await;
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("ctrl-c received");

    let health = running.health().await;
    info!(health = %json!(health), "final queue state");
    if !running.shutdown().await {
        warn!("some tasks were still running at shutdown");
    }
    Ok(())
}

async fn seed_demo(db: &InMemoryDatabase, gateway: &SandboxGateway, clock: &dyn Clock) {
    let now = clock.now();
    db.insert_session(ActivitySession {
        id: "S-demo".into(),
        activity_id: "A-demo".into(),
        starts_at: now + Duration::hours(6),
        capacity: 12,
        available_spots: 9,
    })
    .await;
    db.insert_booking(Booking {
        id: "B-demo".into(),
        user_id: "U-demo".into(),
        activity_id: "A-demo".into(),
        session_id: "S-demo".into(),
        quantity: 3,
        total: Money::from_minor(4500),
        status: BookingStatus::Pending,
        created_at: now,
        reminded_at: None,
    })
    .await;
    db.insert_payment(Payment {
        id: "P-demo".into(),
        booking_id: "B-demo".into(),
        amount: Money::from_minor(4500),
        status: PaymentStatus::Pending,
        intent_id: Some("pi_demo".into()),
        refund_amount: Money::ZERO,
    })
    .await;
    db.set_activity_title("A-demo", "Little chefs").await;
    db.set_parent_email("U-demo", "parent@example.com").await;
    gateway.add_intent("pi_demo", Money::from_minor(4500));
}

async fn enqueue_demo(dispatcher: &Dispatcher) {
    let correlation = Correlation {
        user_id: Some("U-demo".into()),
        booking_id: Some("B-demo".into()),
        activity_id: Some("A-demo".into()),
    };
    let tasks = [
        TaskPayload::ProcessPayment(ProcessPayment {
            booking_id: "B-demo".into(),
            action: PaymentAction::Capture,
            amount: None,
            reason: None,
        }),
        TaskPayload::SendEmail(SendEmail {
            to: "parent@example.com".into(),
            subject: "Booking received".into(),
            template: "booking-confirmation".into(),
            context: serde_json::Map::from_iter([("bookingId".to_string(), json!("B-demo"))]),
        }),
        TaskPayload::SendSms(SendSms {
            to: "+254 700 000000".into(),
            message: "Your Little chefs booking is in.".into(),
        }),
        TaskPayload::UpdateActivityStats(UpdateActivityStats {
            activity_id: Some("A-demo".into()),
        }),
        TaskPayload::GenerateReport(GenerateReport {
            report_type: ReportType::RevenueReport,
            from: None,
            to: None,
            requested_by: Some("demo".into()),
        }),
    ];
    for payload in tasks {
        let kind = payload.kind();
        let options = EnqueueOptions::new().correlation(correlation.clone());
        if let Some(handle) = dispatcher.dispatch(payload, options).await.or_log("demo task") {
            info!(kind = %kind, task_id = ?handle.task_id(), "demo task enqueued");
        }
    }
}
