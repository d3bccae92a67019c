mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sprout_core::app::EnqueueOptions;
use sprout_core::domain::{
    EventType, Outcome, ProcessorError, QueueName, SendSms, TaskKind, TaskPayload,
};
use sprout_core::queue::TaskState;
use sprout_core::typed::{Handler, TaskContext};

use common::{Harness, fast_config, wait_finished};

/// Fails transiently `failures` times, then succeeds. Records call times.
struct Flaky {
    failures: u32,
    permanent: bool,
    calls: Arc<Mutex<Vec<(u32, Instant)>>>,
}

impl Flaky {
    fn new(failures: u32) -> (Self, Arc<Mutex<Vec<(u32, Instant)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handler = Self {
            failures,
            permanent: false,
            calls: calls.clone(),
        };
        (handler, calls)
    }
}

#[async_trait]
impl Handler<SendSms> for Flaky {
    async fn handle(&self, _task: SendSms, ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        self.calls.lock().unwrap().push((ctx.attempt, Instant::now()));
        if self.permanent {
            return Err(ProcessorError::permanent("number is blocked"));
        }
        if ctx.attempt <= self.failures {
            return Err(ProcessorError::transient(format!("provider timeout #{}", ctx.attempt)));
        }
        Ok(Outcome::done())
    }
}

fn sms() -> TaskPayload {
    TaskPayload::SendSms(SendSms {
        to: "+254 700 000000".into(),
        message: "See you at the pool".into(),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_retry_with_growing_backoff() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    let (flaky, calls) = Flaky::new(2);
    let running = harness
        .builder(fast_config())
        .register::<SendSms, _>(flaky)
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let handle = running
        .dispatcher()
        .dispatch(sms(), EnqueueOptions::new())
        .await
        .unwrap();
    let id = handle.task_id().unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Notification, id, Duration::from_secs(5)).await;

    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.attempts, 3);

    let calls = calls.lock().unwrap().clone();
    let attempts: Vec<u32> = calls.iter().map(|(a, _)| *a).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    // 50ms base, doubling
    assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(50));
    assert!(calls[2].1 - calls[1].1 >= Duration::from_millis(100));

    let mut failed_with_retry = 0;
    while let Ok(event) = events.try_recv() {
        if event.task_id == id && event.event == EventType::Failed {
            assert!(event.retry_at.is_some());
            failed_with_retry += 1;
        }
    }
    assert_eq!(failed_with_retry, 2);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_attempts_end_in_failed() {
    let harness = Harness::new();
    let (flaky, calls) = Flaky::new(u32::MAX);
    let running = harness
        .builder(fast_config())
        .register::<SendSms, _>(flaky)
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;

    let id = running
        .dispatcher()
        .dispatch(sms(), EnqueueOptions::new().max_attempts(2))
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Notification, id, Duration::from_secs(5)).await;

    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.attempts, 2);
    assert!(record.last_error.unwrap().contains("attempts exhausted"));
    assert_eq!(calls.lock().unwrap().len(), 2);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_errors_are_not_retried() {
    let harness = Harness::new();
    let (mut flaky, calls) = Flaky::new(0);
    flaky.permanent = true;
    let running = harness
        .builder(fast_config())
        .register::<SendSms, _>(flaky)
        .unwrap()
        .expect_tasks(&[TaskKind::SendSms])
        .build()
        .unwrap()
        .start()
        .await;

    let id = running
        .dispatcher()
        .dispatch(sms(), EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Notification, id, Duration::from_secs(5)).await;

    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
    // not a financial kind
    assert!(harness.alerts.raised().is_empty());
    assert!(running.shutdown().await);
}
