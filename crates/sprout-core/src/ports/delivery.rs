//! Delivery ports: the transports behind email / SMS / push.
//!
//! Only `send(message) -> outcome` is assumed; templates, providers and
//! rate limits live behind the implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ProcessorError, SendEmail, SendPushNotification, SendSms};

pub type EmailMessage = SendEmail;
pub type SmsMessage = SendSms;
pub type PushMessage = SendPushNotification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The provider refused the message (bad address, opted out, ...).
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// Provider down, timeout, rate limited.
    #[error("delivery provider unavailable: {0}")]
    Unavailable(String),
}

impl From<DeliveryError> for ProcessorError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Rejected(_) => ProcessorError::permanent(e.to_string()),
            DeliveryError::Unavailable(_) => ProcessorError::transient(e.to_string()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(&self, message: &PushMessage) -> Result<(), DeliveryError>;
}
