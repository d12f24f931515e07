//! Persisted store trait — durable turns, profiles, and tasks.
//!
//! Implementations must be safe to share across concurrent requests; the
//! context pipeline never serializes access on their behalf.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::profile::UserProfile;
use crate::task::{NewTask, Task, TaskFilter, TaskStatus};
use crate::turn::{Turn, TurnId};

/// The durable side of conversation memory.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append a completed exchange and return its durable id.
    /// New turns start out unindexed.
    async fn append_turn(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
    ) -> Result<Turn, StoreError>;

    /// Up to `limit` turns for `user_id`, most recent first.
    ///
    /// Equal timestamps are ordered by insertion sequence, later first.
    async fn fetch_recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError>;

    /// Number of stored turns for `user_id`.
    async fn count_turns(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Delete every turn for `user_id`. Returns how many were removed.
    async fn clear_turns(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Turns that were persisted but never made it into the semantic index,
    /// oldest first.
    async fn fetch_unindexed(&self, limit: usize) -> Result<Vec<Turn>, StoreError>;

    /// Record that `id` is present in the semantic index.
    async fn mark_indexed(&self, id: TurnId) -> Result<(), StoreError>;

    /// Flag every turn of `user_id` as missing from the semantic index so
    /// the next reindex embeds them again. Returns how many were flagged.
    async fn mark_unindexed(&self, user_id: &str) -> Result<usize, StoreError>;

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn store_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    async fn append_task(&self, user_id: &str, task: NewTask) -> Result<Task, StoreError>;

    async fn fetch_tasks(&self, user_id: &str, filter: TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Returns `false` when no task has that id.
    async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<bool, StoreError>;
}
