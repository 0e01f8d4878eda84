use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use tracing::{info, warn};

use crate::{
    cache::ResultCache,
    domain::{
        error::ValidationError,
        key::ArtifactKey,
        types::{CacheStatus, OutputFormat},
    },
};

use super::provider::{DescribeError, DescriptionProvider, Descriptions};

#[derive(Debug, Clone)]
pub struct DescribeOutcome {
    pub descriptions: Descriptions,
    pub cache: CacheStatus,
}

/// Description generation backed by the shared result cache.
///
/// Descriptions are keyed by source alone, so an svg and a png render of the
/// same diagram share one entry.
#[derive(Clone)]
pub struct DescribeService {
    provider: Option<Arc<dyn DescriptionProvider>>,
    cache: Arc<ResultCache>,
}

impl DescribeService {
    pub fn new(provider: Option<Arc<dyn DescriptionProvider>>, cache: Arc<ResultCache>) -> Self {
        Self { provider, cache }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn describe(
        &self,
        source: Option<&str>,
        image_base64: Option<&str>,
        format: OutputFormat,
    ) -> Result<DescribeOutcome, DescribeError> {
        let provider = self.provider.as_ref().ok_or(DescribeError::NotConfigured)?;

        let source = source
            .filter(|source| !source.is_empty())
            .ok_or(ValidationError::EmptyOrWrongType)?;
        let image_base64 = image_base64
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                DescribeError::InvalidInput("imageBase64 must be a non-empty string".to_string())
            })?;
        STANDARD
            .decode(image_base64)
            .map_err(|err| DescribeError::InvalidImage(err.to_string()))?;

        let key = ArtifactKey::for_description(source);
        if let Some(descriptions) = self.cached(&key) {
            info!(
                target = "tikzrender::describe::service",
                op = "describe",
                result = "cache_hit",
                key = %key,
                "Description served from cache"
            );
            return Ok(DescribeOutcome {
                descriptions,
                cache: CacheStatus::Hit,
            });
        }

        let descriptions = provider.describe(source, image_base64, format).await?;
        match serde_json::to_vec(&descriptions) {
            Ok(encoded) => self.cache.set(&key, Bytes::from(encoded)),
            Err(err) => warn!(
                target = "tikzrender::describe::service",
                key = %key,
                error = %err,
                "Failed to encode descriptions for cache"
            ),
        }

        info!(
            target = "tikzrender::describe::service",
            op = "describe",
            result = "generated",
            key = %key,
            format = format.as_str(),
            alt_text_chars = descriptions.alt_text.chars().count(),
            "Generated diagram description"
        );

        Ok(DescribeOutcome {
            descriptions,
            cache: CacheStatus::Miss,
        })
    }

    fn cached(&self, key: &ArtifactKey) -> Option<Descriptions> {
        let bytes = self.cache.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(descriptions) => Some(descriptions),
            Err(err) => {
                warn!(
                    target = "tikzrender::describe::service",
                    key = %key,
                    error = %err,
                    "Discarding undecodable cached description"
                );
                None
            }
        }
    }
}
