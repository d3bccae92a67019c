mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sprout_core::app::EnqueueOptions;
use sprout_core::domain::{
    BookingStatus, Money, Outcome, PaymentAction, PaymentStatus, ProcessPayment, ProcessorError,
    QueueName, TaskKind, TaskPayload,
};
use sprout_core::ports::{BookingStore, Severity};
use sprout_core::processors::register_defaults;
use sprout_core::queue::TaskState;
use sprout_core::typed::{Handler, TaskContext};

use common::{Harness, fast_config, wait_finished};

fn refund(amount: Option<i64>) -> TaskPayload {
    TaskPayload::ProcessPayment(ProcessPayment {
        booking_id: "B1".into(),
        action: PaymentAction::Refund,
        amount: amount.map(Money::from_minor),
        reason: Some("parent cancelled".into()),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_refund_keeps_booking_confirmed() {
    let harness = Harness::new();
    harness.seed_paid_booking().await;
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let id = running
        .dispatcher()
        .dispatch(refund(Some(1000)), EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
    assert_eq!(record.state, TaskState::Completed);

    let payment = harness.db.payment_for_booking("B1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(payment.refund_amount, Money::from_minor(1000));
    let booking = harness.db.booking("B1").await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(harness.db.session("S1").await.unwrap().unwrap().available_spots, 5);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_refund_cancels_booking_and_returns_spots() {
    let harness = Harness::new();
    harness.seed_paid_booking().await;
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let id = running
        .dispatcher()
        .dispatch(refund(None), EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
    assert_eq!(record.state, TaskState::Completed);

    let payment = harness.db.payment_for_booking("B1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    let booking = harness.db.booking("B1").await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(harness.db.session("S1").await.unwrap().unwrap().available_spots, 8);
    assert_eq!(harness.gateway.refunds().len(), 1);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn separate_refund_tasks_for_the_same_amount_both_refund() {
    let harness = Harness::new();
    harness.seed_paid_booking().await;
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;
    let dispatcher = running.dispatcher();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let id = dispatcher
            .dispatch(refund(Some(500)), EnqueueOptions::new())
            .await
            .unwrap()
            .task_id()
            .unwrap();
        let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
        assert_eq!(record.state, TaskState::Completed);
        outcomes.push(record.outcome.unwrap());
    }

    assert!(outcomes.iter().all(|o| !o.is_skipped()));
    assert_eq!(harness.gateway.refunds().len(), 2);
    let payment = harness.db.payment_for_booking("B1").await.unwrap().unwrap();
    assert_eq!(payment.refund_amount, Money::from_minor(1000));
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_payment_failure_alerts_operators() {
    let harness = Harness::new();
    // no booking seeded: the processor fails permanently
    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let id = running
        .dispatcher()
        .dispatch(refund(None), EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.attempts, 1);

    // raised right after the failure is recorded
    let alerts = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let raised = harness.alerts.raised();
            if !raised.is_empty() {
                return raised;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no operator alert raised");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].task_id, id);
    assert_eq!(alerts[0].kind, TaskKind::ProcessPayment);
    assert!(running.shutdown().await);
}

/// Holds each task briefly and tracks how many run at once.
struct Gauge {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<ProcessPayment> for Gauge {
    async fn handle(&self, _task: ProcessPayment, _ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Outcome::done())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payment_queue_runs_at_most_two_at_a_time() {
    let harness = Harness::new();
    let peak = Arc::new(AtomicUsize::new(0));
    let gauge = Gauge {
        in_flight: Arc::new(AtomicUsize::new(0)),
        peak: peak.clone(),
    };
    let running = harness
        .builder(fast_config())
        .register::<ProcessPayment, _>(gauge)
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;
    assert_eq!(running.pool_sizes(), vec![(QueueName::Payment, 2)]);

    let dispatcher = running.dispatcher();
    let mut ids = Vec::new();
    for n in 0..10 {
        let payload = TaskPayload::ProcessPayment(ProcessPayment {
            booking_id: format!("B{n}"),
            action: PaymentAction::Capture,
            amount: None,
            reason: None,
        });
        ids.push(
            dispatcher
                .dispatch(payload, EnqueueOptions::new())
                .await
                .unwrap()
                .task_id()
                .unwrap(),
        );
    }
    for id in ids {
        let record = wait_finished(harness.store.as_ref(), QueueName::Payment, id, Duration::from_secs(5)).await;
        assert_eq!(record.state, TaskState::Completed);
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(running.shutdown().await);
}
