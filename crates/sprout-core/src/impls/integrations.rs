//! Integration 実装（開発用）
//!
//! - **StaticExternalSync**: 事前に登録したレコードを返す partner system
//! - **PassthroughImagePipeline**: 変換せず variant ごとの URL だけ作る

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ports::{ExternalRecord, ExternalSync, ImagePipeline, ImageVariant, IntegrationError};

pub const DEFAULT_IMAGE_VARIANTS: [&str; 3] = ["thumbnail", "card", "full"];

#[derive(Debug, Clone, Default)]
pub struct StaticExternalSync {
    sources: HashMap<String, Vec<ExternalRecord>>,
}

impl StaticExternalSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: &str, records: Vec<ExternalRecord>) -> Self {
        self.sources.insert(source.to_string(), records);
        self
    }
}

#[async_trait]
impl ExternalSync for StaticExternalSync {
    async fn pull(
        &self,
        source: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExternalRecord>, IntegrationError> {
        let records = self
            .sources
            .get(source)
            .ok_or_else(|| IntegrationError::UnknownSource(source.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| since.is_none_or(|since| r.updated_at > since))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct PassthroughImagePipeline {
    base_url: String,
}

impl PassthroughImagePipeline {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for PassthroughImagePipeline {
    fn default() -> Self {
        Self::new("https://cdn.sprout.local/uploads")
    }
}

#[async_trait]
impl ImagePipeline for PassthroughImagePipeline {
    async fn process(
        &self,
        upload_id: &str,
        user_id: &str,
        variants: &[String],
    ) -> Result<Vec<ImageVariant>, IntegrationError> {
        let names: Vec<&str> = if variants.is_empty() {
            DEFAULT_IMAGE_VARIANTS.to_vec()
        } else {
            variants.iter().map(String::as_str).collect()
        };
        if let Some(bad) = names
            .iter()
            .find(|n| n.is_empty() || !n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        {
            return Err(IntegrationError::Rejected(format!("bad variant name '{bad}'")));
        }
        Ok(names
            .into_iter()
            .map(|name| ImageVariant {
                name: name.to_string(),
                url: format!("{}/{user_id}/{upload_id}/{name}.jpg", self.base_url),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn pull_filters_by_since() {
        let now = Utc::now();
        let record = |id: &str, at| ExternalRecord {
            source: "partner".into(),
            external_id: id.into(),
            data: json!({ "title": id }),
            updated_at: at,
        };
        let sync = StaticExternalSync::new().with_source(
            "partner",
            vec![record("old", now - Duration::days(2)), record("new", now)],
        );

        assert_eq!(sync.pull("partner", None).await.unwrap().len(), 2);
        let fresh = sync
            .pull("partner", Some(now - Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].external_id, "new");
        assert!(matches!(
            sync.pull("nope", None).await,
            Err(IntegrationError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn default_variants_are_produced() {
        let pipeline = PassthroughImagePipeline::new("https://cdn.test/");
        let variants = pipeline.process("up1", "U1", &[]).await.unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].url, "https://cdn.test/U1/up1/thumbnail.jpg");
    }
}
