//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_tasks()` で必要な kind を宣言し、`build()` 時に
//!   「期待集合 ⊆ 登録済み集合」をチェック
//! - 設定ファイルの schedule も build 時に検証（cron 式、kind の登録）

use std::sync::Arc;

use super::dispatcher::{Dispatcher, QueueDefaults};
use super::scheduler::ScheduleTable;
use super::service::TaskService;
use crate::config::SproutConfig;
use crate::domain::{Decider, DefaultDecider, InvalidCron, QueueName, TaskKind};
use crate::ports::{AlertSink, Clock, EventSink, IdGenerator};
use crate::queue::QueueStore;
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// Infrastructure shared by every component of a service.
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<dyn QueueStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: Arc<dyn EventSink>,
    pub alerts: Arc<dyn AlertSink>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task kinds: {0:?}. These kinds were expected but have no processor.")]
    MissingTaskKinds(Vec<TaskKind>),

    #[error("schedule '{name}': {source}")]
    InvalidSchedule {
        name: String,
        #[source]
        source: InvalidCron,
    },

    #[error("schedule '{name}' enqueues {kind}, which has no processor")]
    UnhandledSchedule { name: String, kind: TaskKind },
}

/// AppBuilder はサービスを構築
///
/// # 使用例
/// ```ignore
/// let builder = AppBuilder::new(config, infra);
/// let dispatcher = builder.dispatcher();
/// let service = builder
///     .register::<SendEmail, _>(EmailProcessor::new(mailer))?
///     .expect_tasks(&TaskKind::ALL)
///     .build()?;
/// let running = service.start().await;
/// ```
pub struct AppBuilder {
    config: SproutConfig,
    infra: Infrastructure,
    registry: TypedRegistry,
    decider: Arc<dyn Decider>,
    schedules: Option<Arc<ScheduleTable>>,
    dispatcher: Dispatcher,
    expected_tasks: Option<Vec<TaskKind>>,
}

impl AppBuilder {
    pub fn new(config: SproutConfig, infra: Infrastructure) -> Self {
        let defaults = QueueName::ALL.map(|queue| {
            let q = config.queue(queue);
            QueueDefaults {
                max_attempts: q.max_attempts,
                backoff: q.retry_policy(),
            }
        });
        let schedules = config
            .scheduler
            .enabled
            .then(|| Arc::new(ScheduleTable::new()));

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&infra.store),
            Arc::clone(&infra.clock),
            Arc::clone(&infra.ids),
            Arc::clone(&infra.events),
        )
        .with_defaults(defaults);
        if let Some(table) = &schedules {
            dispatcher = dispatcher.with_schedules(Arc::clone(table));
        }

        Self {
            config,
            infra,
            registry: TypedRegistry::new(),
            decider: Arc::new(DefaultDecider),
            schedules,
            dispatcher,
            expected_tasks: None,
        }
    }

    /// The service's dispatcher, for processors that enqueue follow-up work.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn config(&self) -> &SproutConfig {
        &self.config
    }

    pub fn infrastructure(&self) -> &Infrastructure {
        &self.infra
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn expect_tasks(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_tasks = Some(kinds.to_vec());
        self
    }

    /// # Errors
    ///
    /// - `MissingTaskKinds`: an expected kind has no processor
    /// - `InvalidSchedule` / `UnhandledSchedule`: a configured schedule is unusable
    pub fn build(self) -> Result<TaskService, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<TaskKind> = expected
                .iter()
                .copied()
                .filter(|kind| !self.registry.contains(*kind))
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskKinds(missing));
            }
        }

        for entry in &self.config.schedules {
            crate::domain::CronSchedule::parse(&entry.cron).map_err(|source| {
                BuildError::InvalidSchedule {
                    name: entry.name.clone(),
                    source,
                }
            })?;
            let kind = entry.payload.kind();
            if !self.registry.contains(kind) {
                return Err(BuildError::UnhandledSchedule {
                    name: entry.name.clone(),
                    kind,
                });
            }
        }

        Ok(TaskService::new(
            self.config,
            self.infra,
            Arc::new(self.registry),
            self.decider,
            self.dispatcher,
            self.schedules,
        ))
    }
}
