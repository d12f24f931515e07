//! The context bundle produced for each request.

use serde::{Deserialize, Serialize};

use crate::turn::{ScoredTurn, Turn};

/// History selected for one model call, within a token budget.
///
/// `recent` is chronological, `relevant` is by descending similarity, and
/// `token_count` never exceeds `max_tokens`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub recent: Vec<Turn>,
    pub relevant: Vec<ScoredTurn>,
    pub token_count: usize,
    pub max_tokens: usize,
    /// Semantic retrieval failed or timed out; the bundle is recency-only.
    #[serde(default)]
    pub relevant_degraded: bool,
}

impl ContextBundle {
    pub fn empty(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.relevant.is_empty()
    }

    /// Number of turns across both sections.
    pub fn len(&self) -> usize {
        self.recent.len() + self.relevant.len()
    }
}
