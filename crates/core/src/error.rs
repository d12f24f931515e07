//! Error types for the Buddy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; the context pipeline maps
//! them onto [`ContextError`] at its boundary.

use thiserror::Error;

/// Errors surfaced by [`crate::ConversationStore`] implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by [`crate::SemanticIndex`] implementations.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// The vector length does not match the index. This is a configuration
    /// problem (embedding model vs. index schema), never a transient one.
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index query failed: {0}")]
    QueryFailed(String),
}

/// Errors surfaced by [`crate::Provider`] implementations.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors from [`get_context`](crate::ContextBundle) assembly.
///
/// Semantic-index degradation is deliberately absent: it is recovered
/// locally and reported through `ContextBundle::relevant_degraded`.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The persisted store could not serve recent history. No fallback
    /// context is synthesized.
    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Embedding and index disagree on dimensionality.
    #[error("Context configuration error: {0}")]
    Configuration(#[source] IndexError),

    #[error("Invalid context request: {0}")]
    InvalidRequest(String),
}
