//! Delivery processors: hand the message to the transport port.
//!
//! Rejections are permanent, provider outages transient (see `DeliveryError`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Outcome, ProcessorError, SendEmail, SendPushNotification, SendSms};
use crate::ports::{Mailer, PushSender, SmsSender};
use crate::typed::{Handler, TaskContext};

pub struct EmailProcessor {
    mailer: Arc<dyn Mailer>,
}

impl EmailProcessor {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Handler<SendEmail> for EmailProcessor {
    async fn handle(&self, task: SendEmail, _ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        self.mailer.send_email(&task).await?;
        Ok(Outcome::done().with_summary(format!("{} email to {}", task.template, task.to)))
    }
}

pub struct SmsProcessor {
    sender: Arc<dyn SmsSender>,
}

impl SmsProcessor {
    pub fn new(sender: Arc<dyn SmsSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Handler<SendSms> for SmsProcessor {
    async fn handle(&self, task: SendSms, _ctx: &TaskContext) -> Result<Outcome, ProcessorError> {
        self.sender.send_sms(&task).await?;
        Ok(Outcome::done().with_summary(format!("sms to {}", task.to)))
    }
}

pub struct PushProcessor {
    sender: Arc<dyn PushSender>,
}

impl PushProcessor {
    pub fn new(sender: Arc<dyn PushSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Handler<SendPushNotification> for PushProcessor {
    async fn handle(
        &self,
        task: SendPushNotification,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        self.sender.send_push(&task).await?;
        Ok(Outcome::done().with_summary(format!("push to user {}", task.user_id)))
    }
}
