//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （データベース、決済 gateway、配信プロバイダ、運用アラート）への
//! インターフェースで、実装の詳細を隠蔽します。
//!
//! 開発・テスト用の実装は [`crate::impls`] にあります。

pub mod alert;
pub mod clock;
pub mod delivery;
pub mod event_sink;
pub mod id_generator;
pub mod integrations;
pub mod payment_gateway;
pub mod persistence;

pub use self::alert::{AlertSink, OperatorAlert, Severity};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery::{
    DeliveryError, EmailMessage, Mailer, PushMessage, PushSender, SmsMessage, SmsSender,
};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::integrations::{ExternalSync, ImagePipeline, IntegrationError};
pub use self::payment_gateway::{GatewayError, PaymentGateway, RefundRequest};
pub use self::persistence::{
    AnalyticsStore, BookingStore, CatalogStore, ExternalRecord, ImageVariant, PersistenceError,
    RefundApplied, SessionStore,
};
