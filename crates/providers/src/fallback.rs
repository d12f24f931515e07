//! Provider fallback — ordered retry chain with per-attempt timeouts.
//!
//! When an attempt fails (timeout, rate limit, error), the next entry in the
//! chain is tried. Each entry pins a model, which is how "default model,
//! then fallback model" on a single endpoint is expressed.

use async_trait::async_trait;
use buddy_core::error::ProviderError;
use buddy_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A provider that wraps an ordered list of attempts and falls back on failure.
pub struct FallbackProvider {
    name: String,
    chain: Vec<FallbackEntry>,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn buddy_core::Provider>,
    /// Replaces `request.model` for this attempt.
    model: String,
    timeout: Duration,
}

impl FallbackProvider {
    /// Create a new fallback provider with no entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Add an attempt that sends `model` instead of the requested one.
    pub fn add_model(
        mut self,
        provider: Arc<dyn buddy_core::Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            model: model.into(),
            timeout,
        });
        self
    }

    /// Number of attempts in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl buddy_core::Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();
            let mut attempt = request.clone();
            attempt.model = entry.model.clone();

            info!(
                provider = %provider_name,
                model = %attempt.model,
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );

            match tokio::time::timeout(entry.timeout, entry.provider.complete(attempt)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Fallback: provider failed, trying next"
                    );
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_ms = entry.timeout.as_millis() as u64,
                        "Fallback: provider timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}ms",
                        provider_name,
                        entry.timeout.as_millis()
                    ));
                }
            }
        }

        Err(last_error)
    }

    /// Embeddings go to the first entry only; a different model would
    /// produce vectors from a different space.
    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        match self.chain.first() {
            Some(entry) => entry.provider.embed(request).await,
            None => Err(ProviderError::NotConfigured(
                "No providers in fallback chain".into(),
            )),
        }
    }
}
