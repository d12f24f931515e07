//! Memory writer — persists each completed exchange to both stores.
//!
//! The durable store is authoritative. Indexing happens after the append and
//! its failure never undoes it: the turn simply stays flagged unindexed
//! until [`MemoryWriter::reindex_pending`] picks it up.

use buddy_core::error::{IndexError, ProviderError, StoreError};
use buddy_core::provider::embed_one;
use buddy_core::{ConversationStore, IndexedMemory, Provider, SemanticIndex, Turn, TurnId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a stored turn could not be indexed.
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error(transparent)]
    Embedding(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Indexed but could not flag the turn: {0}")]
    Flag(#[from] StoreError),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub failed: usize,
}

pub struct MemoryWriter {
    store: Arc<dyn ConversationStore>,
    index: Arc<dyn SemanticIndex>,
    provider: Arc<dyn Provider>,
    embedding_model: String,
}

impl MemoryWriter {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        index: Arc<dyn SemanticIndex>,
        provider: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            embedding_model: embedding_model.into(),
        }
    }

    /// Persist a turn, then try to index it under the same id.
    ///
    /// Only a store failure is returned; indexing problems are logged.
    pub async fn update_memory(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
    ) -> Result<TurnId, StoreError> {
        let turn = self.store.append_turn(user_id, message, response).await?;

        match self.index_turn(&turn).await {
            Ok(()) => debug!(turn_id = %turn.id, user_id, "Turn stored and indexed"),
            Err(e) => warn!(
                turn_id = %turn.id,
                user_id,
                error = %e,
                "Turn stored but not indexed, left for reindex"
            ),
        }

        Ok(turn.id)
    }

    /// Index up to `limit` turns that were stored but never indexed.
    pub async fn reindex_pending(&self, limit: usize) -> Result<ReindexReport, StoreError> {
        let pending = self.store.fetch_unindexed(limit).await?;
        let mut report = ReindexReport {
            scanned: pending.len(),
            ..ReindexReport::default()
        };

        for turn in &pending {
            match self.index_turn(turn).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    warn!(turn_id = %turn.id, error = %e, "Reindex failed for turn");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                indexed = report.indexed,
                failed = report.failed,
                "Reindex pass complete"
            );
        }
        Ok(report)
    }

    async fn index_turn(&self, turn: &Turn) -> Result<(), IndexingError> {
        let vector =
            embed_one(self.provider.as_ref(), &self.embedding_model, &turn.combined_text()).await?;
        self.index.add(IndexedMemory::from_turn(turn, vector)).await?;
        self.store.mark_indexed(turn.id).await?;
        Ok(())
    }
}
