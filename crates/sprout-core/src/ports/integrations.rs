//! Third-party integrations used by maintenance tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::persistence::{ExternalRecord, ImageVariant};
use crate::domain::ProcessorError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrationError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("integration rejected input: {0}")]
    Rejected(String),

    #[error("integration unavailable: {0}")]
    Unavailable(String),
}

impl From<IntegrationError> for ProcessorError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::Unavailable(_) => ProcessorError::transient(e.to_string()),
            IntegrationError::UnknownSource(_) | IntegrationError::Rejected(_) => {
                ProcessorError::permanent(e.to_string())
            }
        }
    }
}

#[async_trait]
pub trait ExternalSync: Send + Sync {
    /// Records changed at the source since `since` (everything when `None`).
    async fn pull(
        &self,
        source: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExternalRecord>, IntegrationError>;
}

#[async_trait]
pub trait ImagePipeline: Send + Sync {
    /// Produce the requested variants (a default set when empty).
    async fn process(
        &self,
        upload_id: &str,
        user_id: &str,
        variants: &[String],
    ) -> Result<Vec<ImageVariant>, IntegrationError>;
}
