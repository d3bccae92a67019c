//! Impls - 実装（開発用・テスト用）
//!
//! ports のプロセス内実装です。テストと `sprout-worker` のデモ構成で使います。
//! 本番ではそれぞれ実際の DB / gateway / provider への adapter に差し替えます。

pub mod alerts;
pub mod database;
pub mod delivery;
pub mod events;
pub mod gateway;
pub mod integrations;

pub use self::alerts::LogAlertSink;
pub use self::database::InMemoryDatabase;
pub use self::delivery::{LogMailer, LogPush, LogSms};
pub use self::events::{BroadcastEventSink, FanoutEventSink, TracingEventSink};
pub use self::gateway::SandboxGateway;
pub use self::integrations::{PassthroughImagePipeline, StaticExternalSync};
