//! Semantic index trait — nearest-neighbour search over turn embeddings.

use async_trait::async_trait;

use crate::error::IndexError;
use crate::turn::{IndexedMemory, ScoredTurn, TurnId};

/// One nearest-neighbour result.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub memory: IndexedMemory,
    /// Similarity in `[0, 1]`, higher is closer.
    pub score: f32,
}

impl IndexHit {
    pub fn into_scored_turn(self) -> ScoredTurn {
        ScoredTurn {
            turn: self.memory.to_turn(),
            score: self.score,
        }
    }
}

/// Vector index over past turns, partitioned by user.
///
/// Implementations: SQLite (brute-force cosine over stored blobs),
/// in-memory (for testing).
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// The backend name.
    fn name(&self) -> &str;

    /// Vector length this index was created with.
    fn dimensions(&self) -> usize;

    /// Insert or replace the record for `memory.turn_id`.
    async fn add(&self, memory: IndexedMemory) -> Result<(), IndexError>;

    /// Up to `k` records of `user_id` closest to `vector`.
    ///
    /// Ordered by descending score; ties by ascending turn id so results
    /// are reproducible for a fixed index state.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        user_id: &str,
    ) -> Result<Vec<IndexHit>, IndexError>;

    /// Whether `id` has a record.
    async fn contains(&self, id: TurnId) -> Result<bool, IndexError>;

    /// Remove every record belonging to `user_id`.
    async fn remove_user(&self, user_id: &str) -> Result<usize, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Reject vectors whose length differs from [`Self::dimensions`].
    fn check_dimensions(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
