//! Task trait - 型付き Task の定義
//!
//! payload の各 struct を [`TaskKind`] と [`TaskPayload`] の variant に
//! 対応付けます。Handler 登録時の kind の typo はコンパイルエラーになります。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{
    CleanupSessions, GenerateReport, ProcessImageUpload, ProcessPayment, SendBookingReminder,
    SendEmail, SendPushNotification, SendSms, SyncExternalData, TaskKind, TaskPayload,
    UpdateActivityStats,
};

/// Task は payload 型と kind を対応付ける
///
/// # Trait Bounds
/// - `Serialize + DeserializeOwned`: envelope に JSON で載るため
/// - `Send + Sync + 'static`: worker slot の spawn 先へ move するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TaskKind;

    fn into_payload(self) -> TaskPayload;

    /// 別 kind の payload はそのまま返す
    fn from_payload(payload: TaskPayload) -> Result<Self, TaskPayload>;
}

macro_rules! impl_task {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Task for $ty {
                const KIND: TaskKind = TaskKind::$ty;

                fn into_payload(self) -> TaskPayload {
                    TaskPayload::$ty(self)
                }

                fn from_payload(payload: TaskPayload) -> Result<Self, TaskPayload> {
                    match payload {
                        TaskPayload::$ty(task) => Ok(task),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_task!(
    SendEmail,
    SendSms,
    SendPushNotification,
    ProcessPayment,
    GenerateReport,
    CleanupSessions,
    SyncExternalData,
    UpdateActivityStats,
    SendBookingReminder,
    ProcessImageUpload,
);
