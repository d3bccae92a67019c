mod common;

use std::time::Duration;

use chrono::Utc;
use sprout_core::app::EnqueueOptions;
use sprout_core::domain::{
    ActivitySession, Booking, BookingStatus, Money, PaymentAction, ProcessPayment, QueueName,
    SendBookingReminder, TaskPayload, UpdateActivityStats,
};
use sprout_core::ports::{AnalyticsStore, BookingStore};
use sprout_core::processors::register_defaults;
use sprout_core::queue::TaskState;

use common::{Harness, fast_config, wait_finished};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refund_and_new_reservations_do_not_lose_spots() {
    let harness = Harness::new();
    harness.seed_paid_booking().await;
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let refund = TaskPayload::ProcessPayment(ProcessPayment {
        booking_id: "B1".into(),
        action: PaymentAction::Refund,
        amount: None,
        reason: None,
    });
    let id = running
        .dispatcher()
        .dispatch(refund, EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();

    // four single-spot checkouts racing the refund
    let reservations: Vec<_> = (0..4)
        .map(|_| {
            let db = harness.db.clone();
            tokio::spawn(async move { db.reserve_spots("S1", 1).await })
        })
        .collect();
    for reservation in reservations {
        reservation.await.unwrap().unwrap();
    }
    let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
    assert_eq!(record.state, TaskState::Completed);

    // 5 left + 3 released - 4 reserved
    let session = harness.db.session("S1").await.unwrap().unwrap();
    assert_eq!(session.available_spots, 4);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn activity_stats_rerun_is_idempotent() {
    let harness = Harness::new();
    harness.seed_paid_booking().await;
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let id = running
            .dispatcher()
            .dispatch(
                TaskPayload::UpdateActivityStats(UpdateActivityStats::default()),
                EnqueueOptions::new(),
            )
            .await
            .unwrap()
            .task_id()
            .unwrap();
        wait_finished(harness.store.as_ref(), QueueName::Maintenance, id, Duration::from_secs(5)).await;
        snapshots.push(harness.db.activity_stats("A1").await.unwrap());
    }

    let stats = snapshots[0].clone().expect("stats written");
    assert_eq!(stats.participants, 3);
    assert_eq!(stats.revenue, Money::from_minor(2000));
    assert_eq!(snapshots[0], snapshots[1]);
    assert!(running.shutdown().await);
}

async fn seed_upcoming(harness: &Harness, booking_id: &str, hours_ahead: i64) {
    let now = Utc::now();
    let session_id = format!("S-{booking_id}");
    harness
        .db
        .insert_session(ActivitySession {
            id: session_id.clone(),
            activity_id: "A9".into(),
            starts_at: now + chrono::Duration::hours(hours_ahead),
            capacity: 8,
            available_spots: 6,
        })
        .await;
    harness
        .db
        .insert_booking(Booking {
            id: booking_id.into(),
            user_id: "U9".into(),
            activity_id: "A9".into(),
            session_id,
            quantity: 2,
            total: Money::from_minor(3000),
            status: BookingStatus::Confirmed,
            created_at: now - chrono::Duration::days(7),
            reminded_at: None,
        })
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reminders_fan_out_once_per_booking() {
    let harness = Harness::new();
    harness.db.set_activity_title("A9", "Forest school").await;
    harness.db.set_parent_email("U9", "family@example.com").await;
    seed_upcoming(&harness, "B-soon", 2).await;
    seed_upcoming(&harness, "B-tonight", 10).await;
    seed_upcoming(&harness, "B-next-week", 24 * 7).await;

    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    for _ in 0..2 {
        let id = running
            .dispatcher()
            .dispatch(
                TaskPayload::SendBookingReminder(SendBookingReminder::default()),
                EnqueueOptions::new(),
            )
            .await
            .unwrap()
            .task_id()
            .unwrap();
        let record = wait_finished(harness.store.as_ref(), QueueName::Notification, id, Duration::from_secs(5)).await;
        assert_eq!(record.state, TaskState::Completed);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.store.counts(QueueName::Email).await.unwrap().completed < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reminder emails were not delivered");

    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.template == "booking-reminder"));
    assert!(sent.iter().all(|m| m.to == "family@example.com"));
    let next_week = harness.db.booking("B-next-week").await.unwrap().unwrap();
    assert!(next_week.reminded_at.is_none());
    assert!(running.shutdown().await);
}
