//! Configuration for the task engine.
//!
//! Layered with figment: serde defaults, then an optional TOML file, then
//! `SPROUT_*` environment variables (`__` separates nesting, e.g.
//! `SPROUT_STORE__REDIS_URL`, `SPROUT_QUEUES__PAYMENT__CONCURRENCY`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};

use crate::domain::{CronSchedule, QueueName, TaskKind, TaskPayload};
use crate::error::ConfigError;
use crate::queue::{MAX_PRIORITY, Retention, RetryPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "config/sprout.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SproutConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Per-queue overrides; queues not listed use [`QueueConfig::default`].
    #[serde(default)]
    pub queues: BTreeMap<QueueName, QueueConfig>,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Recurring tasks registered at startup.
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How often an idle worker slot polls a store that cannot notify it.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Total worker slots for the queue. When unset, the sum of the
    /// per-kind concurrency of the kinds registered on it.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Per-kind concurrency overrides.
    #[serde(default)]
    pub kinds: BTreeMap<TaskKind, usize>,
    #[serde(default = "default_retention")]
    pub keep_completed: usize,
    #[serde(default = "default_retention")]
    pub keep_failed: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Processor time limit; a timeout counts as a transient failure.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            kinds: BTreeMap::new(),
            keep_completed: default_retention(),
            keep_failed: default_retention(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn kind_concurrency(&self, kind: TaskKind) -> usize {
        self.kinds
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_concurrency())
    }

    /// Slots for a pool serving `kinds`.
    pub fn pool_size(&self, kinds: &[TaskKind]) -> usize {
        self.concurrency
            .unwrap_or_else(|| kinds.iter().map(|k| self.kind_concurrency(*k)).sum())
    }

    pub fn retention(&self) -> Retention {
        Retention {
            completed: self.keep_completed,
            failed: self.keep_failed,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential_ms(self.backoff_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Active tasks with no heartbeat for this long are requeued.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long shutdown waits for in-flight tasks.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: default_stall_timeout_ms(),
            stall_check_interval_ms: default_stall_check_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl WorkersConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on how long the scheduler sleeps between checks.
    #[serde(default = "default_scheduler_tick_ms")]
    pub max_tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tick_ms: default_scheduler_tick_ms(),
        }
    }
}

/// A recurring task: `payload` is enqueued on its kind's queue at every fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub cron: String,
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Skip payment actions whose idempotency key is already recorded.
    #[serde(default = "default_true")]
    pub idempotency_guard: bool,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            idempotency_guard: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_backend() -> BackendKind {
    BackendKind::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "sprout".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    2_000
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_retention() -> usize {
    50
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    2_000
}

const fn default_stall_timeout_ms() -> u64 {
    30_000
}

const fn default_stall_check_interval_ms() -> u64 {
    15_000
}

const fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

const fn default_shutdown_grace_ms() -> u64 {
    10_000
}

const fn default_scheduler_tick_ms() -> u64 {
    1_000
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SproutConfig {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be parsed or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let figment = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("SPROUT_").split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Settings for `queue`, defaults when not configured.
    pub fn queue(&self, queue: QueueName) -> QueueConfig {
        self.queues.get(&queue).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, queue) in &self.queues {
            if queue.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "queues.{name}.max_attempts must be at least 1"
                )));
            }
            if queue.concurrency == Some(0) || queue.kinds.values().any(|c| *c == 0) {
                return Err(ConfigError::Invalid(format!(
                    "queues.{name}: concurrency must be at least 1"
                )));
            }
            if let Some(kind) = queue.kinds.keys().find(|k| k.queue() != *name) {
                return Err(ConfigError::Invalid(format!(
                    "queues.{name}.kinds: {kind} runs on queue {}",
                    kind.queue()
                )));
            }
        }

        if self.workers.heartbeat_interval_ms >= self.workers.stall_timeout_ms {
            return Err(ConfigError::Invalid(
                "workers.heartbeat_interval_ms must be below workers.stall_timeout_ms".to_string(),
            ));
        }

        for entry in &self.schedules {
            CronSchedule::parse(&entry.cron)
                .map_err(|e| ConfigError::Invalid(format!("schedules.{}: {e}", entry.name)))?;
            entry
                .payload
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("schedules.{}: {e}", entry.name)))?;
            if entry.priority.is_some_and(|p| p > MAX_PRIORITY) {
                return Err(ConfigError::Invalid(format!(
                    "schedules.{}: priority above {MAX_PRIORITY}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
