mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sprout_core::app::{DispatchResultExt, EnqueueOptions};
use sprout_core::config::BackendKind;
use sprout_core::domain::{
    CleanupSessions, EventType, Outcome, ProcessorError, QueueName, SendEmail, SendSms, TaskKind,
    TaskPayload,
};
use sprout_core::ports::{Clock, SystemClock};
use sprout_core::processors::register_defaults;
use sprout_core::queue::{InMemoryQueueStore, QueueStore, TaskState, connect_store};

use sprout_core::typed::{Handler, TaskContext};

use common::{Harness, fast_config, wait_finished};

/// Never finishes on its own.
struct Stuck;

#[async_trait]
impl Handler<SendEmail> for Stuck {
    async fn handle(&self, _task: SendEmail, _ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Outcome::done())
    }
}

#[async_trait]
impl Handler<SendSms> for Stuck {
    async fn handle(&self, _task: SendSms, _ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Outcome::done())
    }
}

fn welcome_email() -> TaskPayload {
    TaskPayload::SendEmail(SendEmail {
        to: "parent@example.com".into(),
        subject: "Welcome to Sprout".into(),
        template: "welcome".into(),
        context: Default::default(),
    })
}

#[tokio::test]
async fn unavailable_queue_does_not_fail_the_producer() {
    let harness = Harness::new();
    harness.store.close().await.unwrap();
    let dispatcher = harness.builder(fast_config()).dispatcher();

    let err = dispatcher
        .dispatch(welcome_email(), EnqueueOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_queue_unavailable());

    // the signup flow logs and carries on
    let handle = dispatcher
        .dispatch(welcome_email(), EnqueueOptions::new())
        .await
        .or_log("welcome email after signup");
    assert!(handle.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_survive_a_worker_restart() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new(Arc::clone(&clock)));

    // a producer-only process: nothing runs on the email queue
    let producer = Harness::with_store(Arc::clone(&clock), Arc::clone(&store));
    let dispatcher = producer.builder(fast_config()).dispatcher();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            dispatcher
                .dispatch(welcome_email(), EnqueueOptions::new())
                .await
                .unwrap()
                .task_id()
                .unwrap(),
        );
    }
    assert_eq!(store.counts(QueueName::Email).await.unwrap().waiting, 3);

    // the worker process comes up later against the same store
    let worker = Harness::with_store(Arc::clone(&clock), Arc::clone(&store));
    let running = register_defaults(worker.builder(fast_config()), &worker.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;
    for id in ids {
        let record = wait_finished(store.as_ref(), QueueName::Email, id, Duration::from_secs(5)).await;
        assert_eq!(record.state, TaskState::Completed);
    }
    assert_eq!(worker.mailer.sent().len(), 3);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_task_is_requeued_and_finished() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    let id = harness
        .builder(fast_config())
        .dispatcher()
        .dispatch(welcome_email(), EnqueueOptions::new())
        .await
        .unwrap()
        .task_id()
        .unwrap();

    // a worker claims the task and dies without reporting back
    let lease = harness
        .store
        .claim_next(QueueName::Email, "crashed-worker")
        .await
        .unwrap()
        .expect("task should be claimable");
    drop(lease);

    let running = register_defaults(harness.builder(fast_config()), &harness.collaborators())
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;
    let record = wait_finished(harness.store.as_ref(), QueueName::Email, id, Duration::from_secs(5)).await;

    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.attempts, 2);
    assert_eq!(harness.mailer.sent().len(), 1);

    let mut stalled = false;
    while let Ok(event) = events.try_recv() {
        stalled |= event.task_id == id && event.event == EventType::Stalled;
    }
    assert!(stalled);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_redis_falls_back_to_degraded_memory() {
    let mut config = fast_config();
    config.store.backend = BackendKind::Redis;
    config.store.redis_url = "redis://127.0.0.1:1".into();
    config.store.connect_timeout_ms = 200;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config, Arc::clone(&clock)).await;
    let harness = Harness::with_store(clock, store);
    let running = register_defaults(harness.builder(config), &harness.collaborators())
        .unwrap()
        .expect_tasks(&TaskKind::ALL)
        .build()
        .unwrap()
        .start()
        .await;

    let health = running.health().await;
    assert!(health.degraded);
    assert!(!health.durable);
    assert!(health.reachable);

    let id = running
        .dispatcher()
        .dispatch(
            TaskPayload::CleanupSessions(CleanupSessions::default()),
            EnqueueOptions::new(),
        )
        .await
        .unwrap()
        .task_id()
        .unwrap();
    let record = wait_finished(harness.store.as_ref(), QueueName::Maintenance, id, Duration::from_secs(5)).await;
    assert_eq!(record.state, TaskState::Completed);
    assert!(running.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_grace_is_shared_by_all_pools() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.workers.shutdown_grace_ms = 400;
    config.workers.heartbeat_interval_ms = 50;
    let running = harness
        .builder(config)
        .register::<SendEmail, _>(Stuck)
        .unwrap()
        .register::<SendSms, _>(Stuck)
        .unwrap()
        .build()
        .unwrap()
        .start()
        .await;
    let dispatcher = running.dispatcher();
    dispatcher
        .dispatch(welcome_email(), EnqueueOptions::new())
        .await
        .unwrap();
    dispatcher
        .dispatch(
            TaskPayload::SendSms(SendSms {
                to: "+15550001111".into(),
                message: "class moved to 10am".into(),
            }),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();

    let busy = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let email = harness.store.counts(QueueName::Email).await.unwrap().active;
            let sms = harness.store.counts(QueueName::Notification).await.unwrap().active;
            if email == 1 && sms == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(busy.is_ok(), "both pools should be running a task");

    let started = Instant::now();
    assert!(!running.shutdown().await);
    // one grace period overall, not one per pool
    assert!(started.elapsed() < Duration::from_millis(750), "took {:?}", started.elapsed());
}
