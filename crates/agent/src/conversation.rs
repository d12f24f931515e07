//! Conversation log — reading back and forgetting a user's turns.
//!
//! Needs no model, so offline commands can use it without an API key.

use std::sync::Arc;

use buddy_core::error::{IndexError, StoreError};
use buddy_core::{ConversationStore, SemanticIndex, Turn};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("Could not remove vectors: {0}")]
    Index(#[from] IndexError),

    #[error("Vectors removed but turns kept: {0}")]
    Store(#[from] StoreError),
}

/// What a conversation reset removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub turns: usize,
    pub vectors: usize,
}

pub struct ConversationLog {
    store: Arc<dyn ConversationStore>,
    index: Arc<dyn SemanticIndex>,
}

impl ConversationLog {
    pub fn new(store: Arc<dyn ConversationStore>, index: Arc<dyn SemanticIndex>) -> Self {
        Self { store, index }
    }

    /// Most recent turns, oldest first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let mut turns = self.store.fetch_recent(user_id, limit).await?;
        turns.reverse();
        Ok(turns)
    }

    pub async fn count(&self, user_id: &str) -> Result<usize, StoreError> {
        self.store.count_turns(user_id).await
    }

    /// Forget the conversation with `user_id`. Profile and tasks stay.
    ///
    /// Vectors go first so forgotten turns never resurface in search. If
    /// the turns then cannot be deleted they are flagged unindexed, which
    /// lets the next reindex restore their vectors.
    pub async fn reset(&self, user_id: &str) -> Result<ResetReport, ResetError> {
        let vectors = self.index.remove_user(user_id).await?;
        let turns = match self.store.clear_turns(user_id).await {
            Ok(turns) => turns,
            Err(e) => {
                match self.store.mark_unindexed(user_id).await {
                    Ok(flagged) => warn!(
                        user_id,
                        flagged,
                        error = %e,
                        "Reset failed, turns queued for reindex"
                    ),
                    Err(flag_err) => error!(
                        user_id,
                        error = %e,
                        flag_error = %flag_err,
                        "Reset failed and turns could not be queued for reindex"
                    ),
                }
                return Err(e.into());
            }
        };
        info!(user_id, turns, vectors, "Conversation reset");
        Ok(ResetReport { turns, vectors })
    }
}
