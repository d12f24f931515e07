//! In-memory backends — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use buddy_core::error::{IndexError, StoreError};
use buddy_core::{
    ConversationStore, IndexHit, IndexedMemory, NewTask, SemanticIndex, Task, TaskFilter,
    TaskStatus, Turn, TurnId, UserProfile,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::rank_nearest;

#[derive(Default)]
struct StoreState {
    turns: Vec<(Turn, bool)>,
    next_turn_id: i64,
    profiles: HashMap<String, UserProfile>,
    tasks: Vec<Task>,
    next_task_id: i64,
}

/// A conversation store that keeps everything in process memory.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn with an explicit timestamp.
    pub async fn append_turn_at(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        timestamp: DateTime<Utc>,
    ) -> Turn {
        let mut state = self.state.write().await;
        state.next_turn_id += 1;
        let turn = Turn {
            id: TurnId(state.next_turn_id),
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: response.to_string(),
            timestamp,
        };
        state.turns.push((turn.clone(), false));
        turn
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_turn(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
    ) -> Result<Turn, StoreError> {
        Ok(self.append_turn_at(user_id, message, response, Utc::now()).await)
    }

    async fn fetch_recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let state = self.state.read().await;
        let mut turns: Vec<Turn> = state
            .turns
            .iter()
            .filter(|(t, _)| t.user_id == user_id)
            .map(|(t, _)| t.clone())
            .collect();
        turns.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        turns.truncate(limit);
        Ok(turns)
    }

    async fn count_turns(&self, user_id: &str) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.turns.iter().filter(|(t, _)| t.user_id == user_id).count())
    }

    async fn clear_turns(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.turns.len();
        state.turns.retain(|(t, _)| t.user_id != user_id);
        Ok(before - state.turns.len())
    }

    async fn fetch_unindexed(&self, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .turns
            .iter()
            .filter(|(_, indexed)| !indexed)
            .take(limit)
            .map(|(t, _)| t.clone())
            .collect())
    }

    async fn mark_indexed(&self, id: TurnId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.turns.iter_mut().find(|(t, _)| t.id == id) {
            Some((_, indexed)) => {
                *indexed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("turn {id}"))),
        }
    }

    async fn mark_unindexed(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let mut flagged = 0;
        for (_, indexed) in state.turns.iter_mut().filter(|(t, _)| t.user_id == user_id) {
            *indexed = false;
            flagged += 1;
        }
        Ok(flagged)
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.read().await.profiles.get(user_id).cloned())
    }

    async fn store_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn append_task(&self, user_id: &str, task: NewTask) -> Result<Task, StoreError> {
        let mut state = self.state.write().await;
        state.next_task_id += 1;
        let now = Utc::now();
        let task = Task {
            id: state.next_task_id,
            user_id: user_id.to_string(),
            description: task.description,
            due: task.due,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn fetch_tasks(
        &self,
        user_id: &str,
        filter: TaskFilter,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A brute-force semantic index held in memory.
pub struct InMemoryIndex {
    dimensions: usize,
    memories: Arc<RwLock<BTreeMap<TurnId, IndexedMemory>>>,
}

impl InMemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            memories: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl SemanticIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn add(&self, memory: IndexedMemory) -> Result<(), IndexError> {
        self.check_dimensions(&memory.embedding)?;
        self.memories.write().await.insert(memory.turn_id, memory);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        user_id: &str,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.check_dimensions(vector)?;
        let memories = self.memories.read().await;
        Ok(rank_nearest(
            memories.values().filter(|m| m.user_id == user_id),
            vector,
            k,
        ))
    }

    async fn contains(&self, id: TurnId) -> Result<bool, IndexError> {
        Ok(self.memories.read().await.contains_key(&id))
    }

    async fn remove_user(&self, user_id: &str) -> Result<usize, IndexError> {
        let mut memories = self.memories.write().await;
        let before = memories.len();
        memories.retain(|_, m| m.user_id != user_id);
        Ok(before - memories.len())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.memories.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let a = store.append_turn("alice", "one", "1").await.unwrap();
        let b = store.append_turn("alice", "two", "2").await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.count_turns("alice").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fetch_recent_newest_first_and_per_user() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        store.append_turn_at("alice", "old", "", base - Duration::seconds(10)).await;
        store.append_turn_at("bob", "other", "", base).await;
        store.append_turn_at("alice", "new", "", base).await;

        let recent = store.fetch_recent("alice", 10).await.unwrap();
        let messages: Vec<&str> = recent.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn equal_timestamps_later_insert_first() {
        let store = InMemoryStore::new();
        let ts = Utc::now();
        store.append_turn_at("alice", "first", "", ts).await;
        store.append_turn_at("alice", "second", "", ts).await;

        let recent = store.fetch_recent("alice", 1).await.unwrap();
        assert_eq!(recent[0].message, "second");
    }

    #[tokio::test]
    async fn unindexed_until_marked() {
        let store = InMemoryStore::new();
        let t = store.append_turn("alice", "hi", "hello").await.unwrap();
        assert_eq!(store.fetch_unindexed(10).await.unwrap().len(), 1);
        store.mark_indexed(t.id).await.unwrap();
        assert!(store.fetch_unindexed(10).await.unwrap().is_empty());
        assert!(store.mark_indexed(TurnId(999)).await.is_err());
    }

    #[tokio::test]
    async fn mark_unindexed_only_touches_that_user() {
        let store = InMemoryStore::new();
        let a = store.append_turn("alice", "hi", "hello").await.unwrap();
        let b = store.append_turn("bob", "yo", "hey").await.unwrap();
        store.mark_indexed(a.id).await.unwrap();
        store.mark_indexed(b.id).await.unwrap();

        assert_eq!(store.mark_unindexed("alice").await.unwrap(), 1);
        let pending = store.fetch_unindexed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "alice");
    }

    #[tokio::test]
    async fn tasks_filter_by_status() {
        let store = InMemoryStore::new();
        let t1 = store
            .append_task("alice", NewTask { description: "buy milk".into(), due: None })
            .await
            .unwrap();
        store
            .append_task(
                "alice",
                NewTask {
                    description: "call mom".into(),
                    due: Some("friday".into()),
                },
            )
            .await
            .unwrap();

        assert!(store.update_task_status(t1.id, TaskStatus::Completed).await.unwrap());
        assert!(!store.update_task_status(42, TaskStatus::Completed).await.unwrap());

        let pending = store.fetch_tasks("alice", TaskFilter::pending(10)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].description, "call mom");
        assert_eq!(store.fetch_tasks("alice", TaskFilter::all(10)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn index_scopes_queries_to_user() {
        let index = InMemoryIndex::new(2);
        let now = Utc::now();
        for (id, user) in [(1, "alice"), (2, "bob")] {
            let turn = Turn {
                id: TurnId(id),
                user_id: user.into(),
                message: "m".into(),
                response: "r".into(),
                timestamp: now,
            };
            index.add(IndexedMemory::from_turn(&turn, vec![1.0, 0.0])).await.unwrap();
        }

        let hits = index.query(&[1.0, 0.0], 5, "alice").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.turn_id, TurnId(1));
        assert!(index.contains(TurnId(2)).await.unwrap());

        assert_eq!(index.remove_user("bob").await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_rejects_wrong_dimensions() {
        let index = InMemoryIndex::new(3);
        let err = index.query(&[1.0], 5, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, actual: 1 }
        ));
    }
}
