//! Token estimation utilities.
//!
//! Two estimators share one trait:
//! - [`HeuristicEstimator`]: `chars / 4`, rounded down. Cheap and exact to
//!   reason about, which keeps budget tests predictable.
//! - [`TiktokenEstimator`]: cl100k BPE counts via `tiktoken-rs`. The tables
//!   are loaded lazily on first use; if that fails every call falls back to
//!   the heuristic, so budgeting never fails because counting is unavailable.

use once_cell::sync::Lazy;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base};

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "cl100k tokenizer unavailable, using chars/4 heuristic");
        None
    }
});

/// Approximate token counting used only for budgeting.
pub trait TokenEstimator: Send + Sync {
    fn name(&self) -> &str;

    /// Estimated tokens in `text`. Non-decreasing in text length.
    fn estimate(&self, text: &str) -> usize;
}

/// `chars / 4`, rounded down.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn estimate(&self, text: &str) -> usize {
        heuristic_tokens(text)
    }
}

/// BPE token counts with the cl100k vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenEstimator;

impl TokenEstimator for TiktokenEstimator {
    fn name(&self) -> &str {
        "cl100k"
    }

    fn estimate(&self, text: &str) -> usize {
        CL100K
            .as_ref()
            .map(|bpe| bpe.encode_with_special_tokens(text).len())
            .unwrap_or_else(|| heuristic_tokens(text))
    }
}

/// Character-count heuristic: 1 token ≈ 4 characters, rounded down.
pub fn heuristic_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Pick an estimator by its config name (`"cl100k"` or `"heuristic"`).
/// Unknown names get the heuristic.
pub fn estimator_for(name: &str) -> Arc<dyn TokenEstimator> {
    match name {
        "cl100k" => Arc::new(TiktokenEstimator),
        _ => Arc::new(HeuristicEstimator),
    }
}
