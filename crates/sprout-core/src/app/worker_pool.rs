//! WorkerPool - queue ごとの実行スロット
//!
//! # スロットのループ
//! 1. `QueueStore::claim_next()` で lease を取得（なければ `wait_for_work`）
//! 2. processor を別 tokio task で実行（panic も失敗として扱える）
//!    実行中は heartbeat を打ち続ける
//! 3. Decider で retry / fail を決める
//! 4. lease.complete / retry / fail で状態を反映し、lifecycle event を出す
//!
//! - shutdown はスロットに新しい lease を取らせないだけ。実行中の task は最後まで走る
//! - スロット同士はブロックし合わない（協調的 async）

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Decider, Decision, EventType, LifecycleEvent, Outcome, ProcessorError, QueueName,
};
use crate::ports::{AlertSink, Clock, EventSink, OperatorAlert, Severity};
use crate::queue::{QueueStore, TaskLease, TaskRecord, TaskState};
use crate::typed::{TaskContext, TypedRegistry};

/// Settings for one queue's pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub queue: QueueName,
    pub slots: usize,
    pub heartbeat_interval: Duration,
    /// Idle slots re-check the store at least this often.
    pub poll_interval: Duration,
    /// Processor time limit; exceeding it is a transient failure.
    pub timeout: Option<Duration>,
}

/// Everything a slot needs, shared by all slots of all pools.
pub struct PoolContext {
    pub store: Arc<dyn QueueStore>,
    pub registry: Arc<TypedRegistry>,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Worker pool handle.
/// - `request_shutdown()` で全スロットが新規 claim を止める
/// - `shutdown_and_join()` で実行中の task の終了を待つ
pub struct WorkerPool {
    queue: QueueName,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `settings.slots` slots.
    pub fn spawn(settings: PoolSettings, ctx: Arc<PoolContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = Arc::new(settings);

        let joins = (0..settings.slots)
            .map(|slot| {
                let worker = format!("{}-{slot}", settings.queue);
                let settings = Arc::clone(&settings);
                let ctx = Arc::clone(&ctx);
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { slot_loop(worker, settings, ctx, rx).await })
            })
            .collect();

        info!(queue = %settings.queue, slots = settings.slots, "worker pool started");
        Self {
            queue: settings.queue,
            shutdown_tx,
            joins,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn slots(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new leases. In-flight work is not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait up to `grace` for in-flight tasks. Slots still busy
    /// after that are aborted; their tasks stay active until stall detection
    /// requeues them. Returns whether every slot finished in time.
    pub async fn shutdown_and_join(self, grace: Duration) -> bool {
        self.join_until(Instant::now() + grace).await
    }

    /// Like `shutdown_and_join`, with a deadline shared by several pools.
    pub async fn join_until(self, deadline: Instant) -> bool {
        self.request_shutdown();
        let mut clean = true;
        for mut join in self.joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(queue = %self.queue, error = %e, "worker slot ended abnormally");
                    clean = false;
                }
                Err(_) => {
                    warn!(queue = %self.queue, "worker slot still busy after shutdown grace, aborting");
                    join.abort();
                    clean = false;
                }
            }
        }
        info!(queue = %self.queue, clean, "worker pool stopped");
        clean
    }
}

async fn slot_loop(
    worker: String,
    settings: Arc<PoolSettings>,
    ctx: Arc<PoolContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let queue = settings.queue;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let claimed = match ctx.store.claim_next(queue, &worker).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(queue = %queue, worker = %worker, error = %e, "claim failed");
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(settings.poll_interval) => {}
                }
                continue;
            }
        };

        let Some(lease) = claimed else {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ctx.store.wait_for_work(queue, settings.poll_interval) => {}
            }
            continue;
        };

        run_one(&worker, lease, &settings, &ctx).await;
    }
    debug!(queue = %queue, worker = %worker, "worker slot stopped");
}

async fn run_one(
    worker: &str,
    lease: Box<dyn TaskLease>,
    settings: &PoolSettings,
    ctx: &PoolContext,
) {
    let record = lease.record().clone();
    let task_id = record.id();
    let kind = record.kind();
    let queue = record.queue();
    let attempt = record.attempts;
    let lifecycle = |event: EventType| {
        LifecycleEvent::new(queue, task_id, kind, event, attempt, ctx.clock.now())
    };

    ctx.events.emit(&lifecycle(EventType::Active));

    // claimed again after stalling with no attempts left
    if record.attempts_exceeded() {
        let message = format!(
            "attempts exhausted after stall ({} of {})",
            record.attempts - 1,
            record.max_attempts
        );
        fail_terminal(lease, &record, message, None, ctx).await;
        return;
    }

    let Some(handler) = ctx.registry.get(kind) else {
        let message = format!("no processor registered for {kind}");
        fail_terminal(lease, &record, message, None, ctx).await;
        return;
    };

    let task_ctx = TaskContext::from_record(&record);
    let payload = record.envelope.payload().clone();
    let started = Instant::now();
    let mut execution =
        tokio::spawn(async move { handler.handle_dyn(payload, &task_ctx).await });

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.tick().await;
    let timeout = async {
        match settings.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timeout);

    let result: Result<Outcome, ProcessorError> = loop {
        tokio::select! {
            joined = &mut execution => {
                break match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(ProcessorError::transient(format!(
                        "processor panicked: {}",
                        panic_message(e.into_panic())
                    ))),
                    Err(e) => Err(ProcessorError::transient(format!("processor aborted: {e}"))),
                };
            }
            _ = heartbeat.tick() => {
                if let Err(e) = lease.heartbeat().await {
                    warn!(queue = %queue, task_id = %task_id, worker, error = %e, "heartbeat failed");
                }
            }
            _ = &mut timeout => {
                execution.abort();
                let limit = settings.timeout.unwrap_or_default();
                break Err(ProcessorError::transient(format!(
                    "processor timed out after {}ms",
                    limit.as_millis()
                )));
            }
        }
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let error = match result {
        Ok(outcome) => {
            let skipped = outcome.is_skipped();
            match lease.complete(outcome).await {
                Ok(_) => {
                    debug!(queue = %queue, task_id = %task_id, kind = %kind, skipped, "task done");
                    ctx.events
                        .emit(&lifecycle(EventType::Completed).with_duration_ms(duration_ms));
                }
                Err(e) => error!(
                    queue = %queue, task_id = %task_id, kind = %kind, error = %e,
                    "could not record completion; stall detection will requeue the task"
                ),
            }
            return;
        }
        Err(error) => error,
    };

    match ctx.decider.decide(&record, &error) {
        Decision::Retry { delay, reason } => {
            let run_at = ctx.clock.now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::days(1));
            info!(queue = %queue, task_id = %task_id, kind = %kind, attempt, reason = %reason, "task will be retried");
            match lease.retry(run_at, error.to_string()).await {
                Ok(stored) if !stored.is_retry_of(&record, run_at) => {
                    warn!(queue = %queue, task_id = %task_id, worker, state = ?stored.state, "lease lost before retry, left as is");
                }
                Ok(_) => {
                    ctx.events.emit(
                        &lifecycle(EventType::Failed)
                            .with_duration_ms(duration_ms)
                            .with_error(error.to_string())
                            .with_retry_at(run_at),
                    );
                    ctx.events.emit(&lifecycle(EventType::Delayed));
                }
                Err(e) => error!(queue = %queue, task_id = %task_id, error = %e, "could not schedule retry"),
            }
        }
        Decision::Fail { reason } => {
            fail_terminal(lease, &record, reason, Some(duration_ms), ctx).await;
        }
    }
}

async fn fail_terminal(
    lease: Box<dyn TaskLease>,
    record: &TaskRecord,
    reason: String,
    duration_ms: Option<u64>,
    ctx: &PoolContext,
) {
    let queue = record.queue();
    let task_id = record.id();
    let kind = record.kind();
    warn!(queue = %queue, task_id = %task_id, kind = %kind, attempt = record.attempts, reason = %reason, "task failed permanently");

    match lease.fail(reason.clone()).await {
        Ok(stored) if stored.state != TaskState::Failed => {
            warn!(queue = %queue, task_id = %task_id, state = ?stored.state, "lease lost before failure, left as is");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            error!(queue = %queue, task_id = %task_id, error = %e, "could not record failure");
            return;
        }
    }

    let mut event = LifecycleEvent::new(
        queue,
        task_id,
        kind,
        EventType::Failed,
        record.attempts,
        ctx.clock.now(),
    )
    .with_error(reason.clone());
    if let Some(ms) = duration_ms {
        event = event.with_duration_ms(ms);
    }
    ctx.events.emit(&event);

    if kind.is_financial() {
        ctx.alerts
            .alert(OperatorAlert {
                severity: Severity::Critical,
                queue,
                task_id,
                kind,
                title: format!("{kind} failed permanently"),
                detail: reason,
                correlation: record.envelope.correlation().clone(),
                attempts: record.attempts,
                at: ctx.clock.now(),
            })
            .await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
