//! Build the provider stack from configuration.

use std::sync::Arc;
use std::time::Duration;

use buddy_config::AppConfig;
use buddy_core::error::ProviderError;
use buddy_core::provider::Provider;

use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider the assistant talks to.
///
/// The result tries `provider.default_model` first and, if configured,
/// `provider.fallback_model` on the same endpoint. Embeddings are served by
/// the endpoint directly.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let settings = &config.provider;
    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None if is_local(&settings.api_url) => "local".to_string(),
        None => {
            return Err(ProviderError::NotConfigured(
                "No API key found. Set BUDDY_API_KEY or OPENAI_API_KEY".into(),
            ));
        }
    };

    let timeout = Duration::from_secs(settings.request_timeout_secs);
    // The HTTP client gets headroom so the chain's own timeout fires first.
    let endpoint: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::with_timeout(
        "openai",
        settings.api_url.clone(),
        api_key,
        timeout + Duration::from_secs(5),
    ));

    let mut chain = FallbackProvider::new("buddy").add_model(
        endpoint.clone(),
        &settings.default_model,
        timeout,
    );
    if let Some(fallback) = &settings.fallback_model {
        if fallback != &settings.default_model {
            chain = chain.add_model(endpoint, fallback, timeout);
        }
    }

    tracing::debug!(
        api_url = %settings.api_url,
        attempts = chain.len(),
        "Provider chain built"
    );
    Ok(Arc::new(chain))
}

fn is_local(url: &str) -> bool {
    url.contains("://localhost") || url.contains("://127.0.0.1")
}
