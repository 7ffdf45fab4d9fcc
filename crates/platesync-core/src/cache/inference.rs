//! Cached image analysis
//!
//! Wraps an [`ImageAnalyzer`] so that submitting byte-identical content with
//! the same prompt for the same identity is answered from the cache instead
//! of paying for another inference call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::key::{content_key, decode_image, identity_pattern};
use super::response::ResponseCache;
use crate::storage::StorageResult;

/// The AI collaborator: turns image bytes and a prompt into a structured result
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    type Output: Serialize + DeserializeOwned + Send;

    async fn analyze(&self, image: &[u8], prompt: &str) -> Result<Self::Output>;
}

/// Content-addressed cache in front of an [`ImageAnalyzer`]
pub struct CachedAnalyzer<A> {
    analyzer: A,
    cache: Arc<ResponseCache>,
    operation: String,
    ttl: Duration,
}

impl<A: ImageAnalyzer> CachedAnalyzer<A> {
    pub fn new(
        analyzer: A,
        cache: Arc<ResponseCache>,
        operation: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            analyzer,
            cache,
            operation: operation.into(),
            ttl,
        }
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// Analyze raw image bytes on behalf of `identity`
    pub async fn analyze(&self, image: &[u8], identity: &str, prompt: &str) -> Result<A::Output> {
        let derived = content_key(&self.operation, image, identity, &[("prompt", prompt)]);
        self.cache
            .get_or_compute(&derived.key, self.ttl, Some(derived.content_hash.as_str()), || {
                self.analyzer.analyze(image, prompt)
            })
            .await
    }

    /// Analyze a base64 or data-URL encoded image
    ///
    /// The key is derived from the decoded bytes, so the same image sent
    /// with different encodings shares one cache entry.
    pub async fn analyze_base64(
        &self,
        encoded: &str,
        identity: &str,
        prompt: &str,
    ) -> Result<A::Output> {
        let image = decode_image(encoded).context("Image is not valid base64")?;
        self.analyze(&image, identity, prompt).await
    }

    /// Drop every cached analysis for `identity`
    pub async fn invalidate_identity(&self, identity: &str) -> StorageResult<usize> {
        let removed = self.cache.invalidate(&identity_pattern(identity)).await?;
        info!("Invalidated {} cached analysis result(s) for {}", removed, identity);
        Ok(removed)
    }
}
