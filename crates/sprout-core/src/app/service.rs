//! TaskService - 構築済みのサービスとその起動・停止
//!
//! グローバルな singleton は持たず、`AppBuilder::build()` が返す値を
//! 呼び出し側が所有します。
//!
//! # 停止順序
//! 1. 全 pool に claim をやめさせ、実行中の task を待つ（`shutdown_grace` まで）
//! 2. scheduler と reaper を止める
//! 3. store を閉じる

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use super::builder::Infrastructure;
use super::dispatcher::{Dispatcher, EnqueueOptions};
use super::reaper_loop::ReaperLoop;
use super::scheduler::{ScheduleTable, Scheduler};
use super::status::{self, HealthReport};
use super::worker_pool::{PoolContext, PoolSettings, WorkerPool};
use crate::config::SproutConfig;
use crate::domain::{Decider, QueueName};
use crate::queue::QueueStore;
use crate::typed::TypedRegistry;

pub struct TaskService {
    config: SproutConfig,
    infra: Infrastructure,
    registry: Arc<TypedRegistry>,
    decider: Arc<dyn Decider>,
    dispatcher: Dispatcher,
    schedules: Option<Arc<ScheduleTable>>,
}

impl TaskService {
    pub(crate) fn new(
        config: SproutConfig,
        infra: Infrastructure,
        registry: Arc<TypedRegistry>,
        decider: Arc<dyn Decider>,
        dispatcher: Dispatcher,
        schedules: Option<Arc<ScheduleTable>>,
    ) -> Self {
        Self {
            config,
            infra,
            registry,
            decider,
            dispatcher,
            schedules,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }

    /// Register configured schedules, then spawn the pools, the reaper and
    /// (when enabled) the scheduler.
    pub async fn start(self) -> RunningService {
        for entry in &self.config.schedules {
            let mut options = EnqueueOptions::new();
            options.priority = entry.priority;
            if let Err(e) = self
                .dispatcher
                .register_recurring(
                    Some(entry.name.clone()),
                    &entry.cron,
                    entry.payload.clone(),
                    options,
                )
                .await
            {
                warn!(schedule = %entry.name, error = %e, "schedule not registered");
            }
        }

        let ctx = Arc::new(PoolContext {
            store: Arc::clone(&self.infra.store),
            registry: Arc::clone(&self.registry),
            decider: Arc::clone(&self.decider),
            clock: Arc::clone(&self.infra.clock),
            events: Arc::clone(&self.infra.events),
            alerts: Arc::clone(&self.infra.alerts),
        });

        let workers = &self.config.workers;
        let pools: Vec<WorkerPool> = QueueName::ALL
            .into_iter()
            .filter_map(|queue| {
                let kinds = self.registry.kinds_on(queue);
                if kinds.is_empty() {
                    return None;
                }
                let queue_config = self.config.queue(queue);
                let settings = PoolSettings {
                    queue,
                    slots: queue_config.pool_size(&kinds).max(1),
                    heartbeat_interval: workers.heartbeat_interval(),
                    poll_interval: self.config.store.poll_interval(),
                    timeout: queue_config.timeout(),
                };
                Some(WorkerPool::spawn(settings, Arc::clone(&ctx)))
            })
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = ReaperLoop::new(
            Arc::clone(&self.infra.store),
            Arc::clone(&self.infra.clock),
            Arc::clone(&self.infra.events),
            workers.stall_timeout(),
            workers.stall_check_interval(),
        );
        let reaper = tokio::spawn(reaper.run(shutdown_rx.clone()));

        let scheduler = self.schedules.as_ref().map(|table| {
            let scheduler = Scheduler::new(
                Arc::clone(table),
                self.dispatcher.clone(),
                Arc::clone(&self.infra.clock),
                std::time::Duration::from_millis(self.config.scheduler.max_tick_ms),
            );
            tokio::spawn(scheduler.run(shutdown_rx.clone()))
        });

        info!(
            backend = ?self.infra.store.backend(),
            degraded = self.infra.store.is_degraded(),
            pools = pools.len(),
            "task service started"
        );

        RunningService {
            config: self.config,
            store: self.infra.store,
            dispatcher: self.dispatcher,
            pools,
            reaper,
            scheduler,
            shutdown_tx,
        }
    }
}

pub struct RunningService {
    config: SproutConfig,
    store: Arc<dyn QueueStore>,
    dispatcher: Dispatcher,
    pools: Vec<WorkerPool>,
    reaper: JoinHandle<()>,
    scheduler: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RunningService {
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Slots per running pool.
    pub fn pool_sizes(&self) -> Vec<(QueueName, usize)> {
        self.pools.iter().map(|p| (p.queue(), p.slots())).collect()
    }

    pub async fn health(&self) -> HealthReport {
        status::health(self.store.as_ref()).await
    }

    /// Graceful shutdown. Returns whether every in-flight task finished
    /// within the grace period.
    pub async fn shutdown(self) -> bool {
        info!("task service shutting down");
        // one grace period for all pools
        let deadline = Instant::now() + self.config.workers.shutdown_grace();
        for pool in &self.pools {
            pool.request_shutdown();
        }
        let mut clean = true;
        for pool in self.pools {
            clean &= pool.join_until(deadline).await;
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.reaper.await {
            warn!(error = %e, "reaper ended abnormally");
        }
        if let Some(scheduler) = self.scheduler
            && let Err(e) = scheduler.await
        {
            warn!(error = %e, "scheduler ended abnormally");
        }

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "queue store did not close cleanly");
        }
        info!(clean, "task service stopped");
        clean
    }
}
