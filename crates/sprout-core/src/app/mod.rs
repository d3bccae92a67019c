//! App - アプリケーション層
//!
//! ports と queue store を組み合わせて、task の投入から実行までを動かします。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 構築とワイヤリング（起動時検証）
//! - **Dispatcher**: task の投入 API
//! - **WorkerPool**: queue ごとの実行スロット（claim→handle→decide→complete）
//! - **Scheduler**: cron による定期投入
//! - **ReaperLoop**: 止まった task の回収
//! - **TaskService / RunningService**: 起動と graceful shutdown
//! - **status**: health / stats

pub mod builder;
pub mod dispatcher;
pub mod reaper_loop;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod worker_pool;

pub use self::builder::{AppBuilder, BuildError, Infrastructure};
pub use self::dispatcher::{
    DispatchResultExt, Dispatcher, EnqueueOptions, QueueDefaults, TaskHandle,
};
pub use self::reaper_loop::ReaperLoop;
pub use self::scheduler::{RecurringTask, ScheduleTable, Scheduler};
pub use self::service::{RunningService, TaskService};
pub use self::status::{HealthReport, health};
pub use self::worker_pool::{PoolContext, PoolSettings, WorkerPool};
