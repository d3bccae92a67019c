//! sprout-core
//!
//! Background task layer for the Sprout activity marketplace: durable
//! queues, typed task kinds, workers with retry and stall recovery, cron
//! schedules, and the processors behind every kind.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task kind, payload, outcome, decision, errors, events, booking）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, EventSink, AlertSink, 配信, 決済, 永続化）
//! - **queue**: QueueStore（Redis / in-memory）と task record の状態遷移
//! - **app**: アプリケーションロジック（builder, dispatcher, worker pool, scheduler, reaper, status）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **processors**: kind ごとの処理本体
//! - **impls**: 開発・テスト用の port 実装
//! - **config** / **observability** / **error**: 設定、ログ、エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod processors;
pub mod queue;
pub mod typed;

pub use app::{AppBuilder, DispatchResultExt, Dispatcher, EnqueueOptions, Infrastructure, TaskHandle};
pub use config::SproutConfig;
pub use domain::{QueueName, TaskKind, TaskPayload};
pub use error::DispatchError;
