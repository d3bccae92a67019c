//! Delivery 実装（tracing に出すだけ）
//!
//! 送った内容は保持するので、テストから確認できます。

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::ports::{
    DeliveryError, EmailMessage, Mailer, PushMessage, PushSender, SmsMessage, SmsSender,
};

/// 送信済みメッセージの記録
struct Outbox<M> {
    sent: Mutex<Vec<M>>,
}

impl<M: Clone> Outbox<M> {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, message: &M) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
    }

    fn snapshot(&self) -> Vec<M> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct LogMailer {
    outbox: Outbox<EmailMessage>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self {
            outbox: Outbox::new(),
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox.snapshot()
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        if !message.to.contains('@') {
            return Err(DeliveryError::Rejected(format!(
                "'{}' is not an email address",
                message.to
            )));
        }
        info!(to = %message.to, template = %message.template, subject = %message.subject, "email sent");
        self.outbox.push(message);
        Ok(())
    }
}

pub struct LogSms {
    outbox: Outbox<SmsMessage>,
}

impl LogSms {
    pub fn new() -> Self {
        Self {
            outbox: Outbox::new(),
        }
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.outbox.snapshot()
    }
}

impl Default for LogSms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmsSender for LogSms {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), DeliveryError> {
        info!(to = %message.to, chars = message.message.chars().count(), "sms sent");
        self.outbox.push(message);
        Ok(())
    }
}

pub struct LogPush {
    outbox: Outbox<PushMessage>,
}

impl LogPush {
    pub fn new() -> Self {
        Self {
            outbox: Outbox::new(),
        }
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.outbox.snapshot()
    }
}

impl Default for LogPush {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushSender for LogPush {
    async fn send_push(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        info!(user_id = %message.user_id, title = %message.title, "push notification sent");
        self.outbox.push(message);
        Ok(())
    }
}
