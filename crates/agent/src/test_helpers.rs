//! Shared test helpers for the pipeline tests.

use async_trait::async_trait;
use buddy_core::error::{IndexError, ProviderError, StoreError};
use buddy_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use buddy_core::{
    ConversationStore, IndexHit, IndexedMemory, NewTask, SemanticIndex, Task, TaskFilter,
    TaskStatus, Turn, TurnId, UserProfile,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const DIMS: usize = 8;

/// A message whose rendered turn (`"User: {m}\nAssistant: "`) costs exactly
/// `tokens` under the chars/4 heuristic. Needs `tokens >= 5`.
pub fn text_for_tokens(tokens: usize) -> String {
    // "User: " + "\nAssistant: " = 18 chars of framing
    "a".repeat(tokens * 4 - 18)
}

/// Bag-of-words vector: similar wording gives similar vectors.
pub fn keyword_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        v[bucket % dims] += 1.0;
    }
    v
}

/// A mock provider with scripted completions and deterministic embeddings.
///
/// Completions are served in order; once the script runs out every call
/// fails with `InvalidResponse`.
pub struct MockProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    vectors: HashMap<String, Vec<f32>>,
    dims: usize,
    embed_error: Option<ProviderError>,
    embed_delay: Option<Duration>,
    embed_calls: Mutex<usize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            vectors: HashMap::new(),
            dims: DIMS,
            embed_error: None,
            embed_delay: None,
            embed_calls: Mutex::new(0),
        }
    }

    pub fn with_replies(self, replies: Vec<Result<String, ProviderError>>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.with_replies(vec![Ok(text.to_string())])
    }

    /// Pin the embedding returned for an exact input text.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    pub fn failing_embeddings(mut self, error: ProviderError) -> Self {
        self.embed_error = Some(error);
        self
    }

    pub fn slow_embeddings(mut self, delay: Duration) -> Self {
        self.embed_delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn embed_calls(&self) -> usize {
        *self.embed_calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(make_text_response(&text, &model)),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::InvalidResponse("no scripted reply left".into())),
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        *self.embed_calls.lock().unwrap() += 1;
        if let Some(delay) = self.embed_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = &self.embed_error {
            return Err(e.clone());
        }
        let embeddings = request
            .inputs
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| keyword_vector(text, self.dims))
            })
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
        })
    }
}

pub fn make_text_response(text: &str, model: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: model.to_string(),
    }
}

/// An index whose every operation fails.
pub struct FailingIndex {
    pub error: IndexError,
}

impl FailingIndex {
    pub fn unavailable() -> Self {
        Self {
            error: IndexError::Unavailable("index offline".into()),
        }
    }
}

#[async_trait]
impl SemanticIndex for FailingIndex {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn add(&self, _memory: IndexedMemory) -> Result<(), IndexError> {
        Err(self.error.clone())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _k: usize,
        _user_id: &str,
    ) -> Result<Vec<IndexHit>, IndexError> {
        Err(self.error.clone())
    }

    async fn contains(&self, _id: TurnId) -> Result<bool, IndexError> {
        Err(self.error.clone())
    }

    async fn remove_user(&self, _user_id: &str) -> Result<usize, IndexError> {
        Err(self.error.clone())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Err(self.error.clone())
    }
}

/// A store whose every operation reports the backend as unavailable.
pub struct FailingStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("database is locked".into()))
}

#[async_trait]
impl ConversationStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn append_turn(&self, _u: &str, _m: &str, _r: &str) -> Result<Turn, StoreError> {
        down()
    }

    async fn fetch_recent(&self, _u: &str, _limit: usize) -> Result<Vec<Turn>, StoreError> {
        down()
    }

    async fn count_turns(&self, _u: &str) -> Result<usize, StoreError> {
        down()
    }

    async fn clear_turns(&self, _u: &str) -> Result<usize, StoreError> {
        down()
    }

    async fn fetch_unindexed(&self, _limit: usize) -> Result<Vec<Turn>, StoreError> {
        down()
    }

    async fn mark_indexed(&self, _id: TurnId) -> Result<(), StoreError> {
        down()
    }

    async fn mark_unindexed(&self, _u: &str) -> Result<usize, StoreError> {
        down()
    }

    async fn fetch_profile(&self, _u: &str) -> Result<Option<UserProfile>, StoreError> {
        down()
    }

    async fn store_profile(&self, _p: &UserProfile) -> Result<(), StoreError> {
        down()
    }

    async fn append_task(&self, _u: &str, _t: NewTask) -> Result<Task, StoreError> {
        down()
    }

    async fn fetch_tasks(&self, _u: &str, _f: TaskFilter) -> Result<Vec<Task>, StoreError> {
        down()
    }

    async fn update_task_status(&self, _id: i64, _s: TaskStatus) -> Result<bool, StoreError> {
        down()
    }
}

/// An in-memory store whose `clear_turns` always fails.
pub struct NoClearStore(pub buddy_memory::InMemoryStore);

#[async_trait]
impl ConversationStore for NoClearStore {
    fn name(&self) -> &str {
        "no_clear"
    }

    async fn append_turn(&self, u: &str, m: &str, r: &str) -> Result<Turn, StoreError> {
        self.0.append_turn(u, m, r).await
    }

    async fn fetch_recent(&self, u: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        self.0.fetch_recent(u, limit).await
    }

    async fn count_turns(&self, u: &str) -> Result<usize, StoreError> {
        self.0.count_turns(u).await
    }

    async fn clear_turns(&self, _u: &str) -> Result<usize, StoreError> {
        down()
    }

    async fn fetch_unindexed(&self, limit: usize) -> Result<Vec<Turn>, StoreError> {
        self.0.fetch_unindexed(limit).await
    }

    async fn mark_indexed(&self, id: TurnId) -> Result<(), StoreError> {
        self.0.mark_indexed(id).await
    }

    async fn mark_unindexed(&self, u: &str) -> Result<usize, StoreError> {
        self.0.mark_unindexed(u).await
    }

    async fn fetch_profile(&self, u: &str) -> Result<Option<UserProfile>, StoreError> {
        self.0.fetch_profile(u).await
    }

    async fn store_profile(&self, p: &UserProfile) -> Result<(), StoreError> {
        self.0.store_profile(p).await
    }

    async fn append_task(&self, u: &str, t: NewTask) -> Result<Task, StoreError> {
        self.0.append_task(u, t).await
    }

    async fn fetch_tasks(&self, u: &str, f: TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.0.fetch_tasks(u, f).await
    }

    async fn update_task_status(&self, id: i64, s: TaskStatus) -> Result<bool, StoreError> {
        self.0.update_task_status(id, s).await
    }
}
