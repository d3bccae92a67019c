//! Payment gateway port. Only the orchestration around it is ours.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Money, ProcessorError, RefundRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 4xx-style rejection: card declined, intent not capturable, refund too large.
    #[error("gateway declined: {0}")]
    Declined(String),

    /// 5xx, timeout, network.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for ProcessorError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Declined(_) => ProcessorError::permanent(e.to_string()),
            GatewayError::Unavailable(_) => ProcessorError::transient(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub intent_id: String,
    /// `None` refunds whatever is left on the intent.
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

/// Gateways are expected to treat a repeated idempotency key as a replay of
/// the first call and return its result.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(
        &self,
        intent_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn refund(
        &self,
        request: &RefundRequest,
        idempotency_key: Option<&str>,
    ) -> Result<RefundRecord, GatewayError>;
}
