//! Context assembly — the core of the request pipeline.
//!
//! Pulls two kinds of history for a user and fits them into a fixed token
//! budget:
//!
//! 1. **Relevant** turns (semantic neighbours of the current message),
//!    highest similarity first — filled first
//! 2. **Recent** turns, oldest first — fill whatever budget remains
//!
//! Each list is filled as a strict prefix: the first candidate that does not
//! fit ends that list, even if a later one would. Entries are never cut.
//!
//! # Determinism
//!
//! For fixed store and index contents the bundle is identical across calls:
//! both sources have deterministic tie-breaks and the fill itself uses no
//! time or randomness.

use crate::context::token::TokenEstimator;
use buddy_config::AppConfig;
use buddy_core::error::{ContextError, IndexError, ProviderError};
use buddy_core::provider::embed_one;
use buddy_core::{
    ContextBundle, ConversationStore, IndexHit, Provider, ScoredTurn, SemanticIndex, Turn, TurnId,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// Limits and knobs for one assembler instance.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Upper bound on `ContextBundle::token_count`.
    pub max_context_tokens: usize,
    /// Recent turns fetched per request.
    pub recent_limit: usize,
    /// Nearest neighbours fetched per request.
    pub relevant_limit: usize,
    /// Bound on embed + index query.
    pub retrieval_timeout: Duration,
    /// Model used to embed the current message.
    pub embedding_model: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 4000,
            recent_limit: 10,
            relevant_limit: 5,
            retrieval_timeout: Duration::from_secs(5),
            embedding_model: "text-embedding-ada-002".into(),
        }
    }
}

impl AssemblerConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_context_tokens: config.context.max_context_tokens,
            recent_limit: config.context.recent_limit,
            relevant_limit: config.context.relevant_limit,
            retrieval_timeout: Duration::from_millis(config.context.retrieval_timeout_ms),
            embedding_model: config.provider.embedding_model.clone(),
        }
    }
}

/// What the fill step kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub relevant_candidates: usize,
    pub relevant_dropped: usize,
    pub recent_candidates: usize,
    pub recent_dropped: usize,
    /// Recent turns removed because they were also retrieved as relevant.
    pub deduplicated: usize,
}

/// Why the semantic half of retrieval produced nothing.
#[derive(Debug)]
enum RetrievalFailure {
    Provider(ProviderError),
    Index(IndexError),
    TimedOut(Duration),
}

impl std::fmt::Display for RetrievalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "embedding failed: {e}"),
            Self::Index(e) => write!(f, "index query failed: {e}"),
            Self::TimedOut(d) => write!(f, "retrieval timed out after {}ms", d.as_millis()),
        }
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Builds a [`ContextBundle`] per request. Holds no mutable state; share it
/// behind an `Arc` across concurrent requests.
pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    index: Arc<dyn SemanticIndex>,
    provider: Arc<dyn Provider>,
    estimator: Arc<dyn TokenEstimator>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        index: Arc<dyn SemanticIndex>,
        provider: Arc<dyn Provider>,
        estimator: Arc<dyn TokenEstimator>,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            estimator,
            config,
        }
    }

    /// Assemble the history to send alongside `current_message`.
    ///
    /// # Algorithm
    ///
    /// 1. Fetch recent turns and (for a non-empty message) semantic
    ///    neighbours concurrently
    /// 2. Store failure → [`ContextError::StoreUnavailable`]; semantic
    ///    failure or timeout → empty `relevant`, `relevant_degraded` set
    /// 3. Drop recent turns that were also retrieved as relevant
    /// 4. Greedy fill: relevant first, then recent oldest-first
    pub async fn get_context(
        &self,
        user_id: &str,
        current_message: &str,
    ) -> Result<ContextBundle, ContextError> {
        if user_id.trim().is_empty() {
            return Err(ContextError::InvalidRequest("user_id must not be empty".into()));
        }

        let (recent, relevant) = tokio::join!(
            self.store.fetch_recent(user_id, self.config.recent_limit),
            self.retrieve_relevant(user_id, current_message),
        );

        let mut recent = recent.map_err(ContextError::StoreUnavailable)?;
        // Store order is newest first; present oldest first.
        recent.reverse();

        let (relevant, degraded) = match relevant {
            Ok(hits) => (hits, false),
            Err(RetrievalFailure::Index(e @ IndexError::DimensionMismatch { .. })) => {
                return Err(ContextError::Configuration(e));
            }
            Err(failure) => {
                warn!(
                    user_id,
                    reason = %failure,
                    "Semantic retrieval degraded, continuing with recent history only"
                );
                (Vec::new(), true)
            }
        };

        let (mut bundle, report) = fill_budget(
            relevant,
            recent,
            self.estimator.as_ref(),
            self.config.max_context_tokens,
        );
        bundle.relevant_degraded = degraded;

        debug!(
            user_id,
            tokens = bundle.token_count,
            budget = bundle.max_tokens,
            relevant = bundle.relevant.len(),
            recent = bundle.recent.len(),
            relevant_dropped = report.relevant_dropped,
            recent_dropped = report.recent_dropped,
            deduplicated = report.deduplicated,
            degraded,
            "Context assembled"
        );

        Ok(bundle)
    }

    async fn retrieve_relevant(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<Vec<ScoredTurn>, RetrievalFailure> {
        if message.trim().is_empty() || self.config.relevant_limit == 0 {
            return Ok(Vec::new());
        }

        let search = async {
            let vector = embed_one(self.provider.as_ref(), &self.config.embedding_model, message)
                .await
                .map_err(RetrievalFailure::Provider)?;
            let hits = self
                .index
                .query(&vector, self.config.relevant_limit, user_id)
                .await
                .map_err(RetrievalFailure::Index)?;
            Ok::<Vec<ScoredTurn>, RetrievalFailure>(
                hits.into_iter().map(IndexHit::into_scored_turn).collect(),
            )
        };

        match tokio::time::timeout(self.config.retrieval_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalFailure::TimedOut(self.config.retrieval_timeout)),
        }
    }
}

// ── Budget fill ───────────────────────────────────────────────────────────

/// Fit `relevant` (descending similarity) and `recent` (chronological) into
/// `max_tokens`.
///
/// Recent turns whose id is among the relevant candidates are removed
/// before filling, so a turn never appears twice or costs budget twice.
/// The cost of a turn is the estimate of its combined rendering.
pub fn fill_budget(
    relevant: Vec<ScoredTurn>,
    recent: Vec<Turn>,
    estimator: &dyn TokenEstimator,
    max_tokens: usize,
) -> (ContextBundle, FillReport) {
    let relevant_ids: HashSet<TurnId> = relevant.iter().map(|s| s.turn.id).collect();
    let recent_before = recent.len();
    let recent: Vec<Turn> = recent
        .into_iter()
        .filter(|t| !relevant_ids.contains(&t.id))
        .collect();

    let mut report = FillReport {
        relevant_candidates: relevant.len(),
        recent_candidates: recent.len(),
        deduplicated: recent_before - recent.len(),
        ..FillReport::default()
    };

    let mut bundle = ContextBundle::empty(max_tokens);
    let mut used = 0usize;

    let (kept, dropped) = take_prefix(
        relevant,
        |s| estimator.estimate(&s.turn.combined_text()),
        &mut used,
        max_tokens,
    );
    bundle.relevant = kept;
    report.relevant_dropped = dropped;

    let (kept, dropped) = take_prefix(
        recent,
        |t| estimator.estimate(&t.combined_text()),
        &mut used,
        max_tokens,
    );
    bundle.recent = kept;
    report.recent_dropped = dropped;

    bundle.token_count = used;
    (bundle, report)
}

/// Accept items in order until one does not fit. Returns kept items and
/// how many were left out.
fn take_prefix<T>(
    items: Vec<T>,
    cost: impl Fn(&T) -> usize,
    used: &mut usize,
    budget: usize,
) -> (Vec<T>, usize) {
    let total = items.len();
    let mut kept = Vec::with_capacity(total);
    for item in items {
        let tokens = cost(&item);
        if *used + tokens > budget {
            break;
        }
        *used += tokens;
        kept.push(item);
    }
    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token::HeuristicEstimator;
    use crate::test_helpers::*;
    use buddy_core::IndexedMemory;
    use buddy_memory::{InMemoryIndex, InMemoryStore};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    // ── Helpers ────────────────────────────────────────────────────────

    fn turn_costing(id: i64, tokens: usize) -> Turn {
        Turn {
            id: TurnId(id),
            user_id: "alice".into(),
            message: text_for_tokens(tokens),
            response: String::new(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    fn scored(turn: Turn, score: f32) -> ScoredTurn {
        ScoredTurn { turn, score }
    }

    fn ids(turns: &[Turn]) -> Vec<i64> {
        turns.iter().map(|t| t.id.0).collect()
    }

    fn relevant_ids(turns: &[ScoredTurn]) -> Vec<i64> {
        turns.iter().map(|s| s.turn.id.0).collect()
    }

    fn config(max_tokens: usize) -> AssemblerConfig {
        AssemblerConfig {
            max_context_tokens: max_tokens,
            retrieval_timeout: Duration::from_millis(200),
            ..AssemblerConfig::default()
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        index: Arc<InMemoryIndex>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                index: Arc::new(InMemoryIndex::new(DIMS)),
            }
        }

        /// Store a turn and index it under `vector`.
        async fn remember(&self, message: &str, response: &str, vector: Vec<f32>) -> Turn {
            let turn = self.store.append_turn("alice", message, response).await.unwrap();
            self.index
                .add(IndexedMemory::from_turn(&turn, vector))
                .await
                .unwrap();
            turn
        }

        fn assembler(&self, provider: MockProvider, config: AssemblerConfig) -> ContextAssembler {
            ContextAssembler::new(
                self.store.clone(),
                self.index.clone(),
                Arc::new(provider),
                Arc::new(HeuristicEstimator),
                config,
            )
        }
    }

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIMS];
        v[i] = 1.0;
        v
    }

    // ── fill_budget ────────────────────────────────────────────────────

    #[test]
    fn helper_costs_are_exact() {
        let t = turn_costing(1, 20);
        assert_eq!(HeuristicEstimator.estimate(&t.combined_text()), 20);
    }

    #[test]
    fn fifty_token_scenario() {
        let recent = vec![turn_costing(1, 10), turn_costing(2, 15), turn_costing(3, 30)];
        let relevant = vec![
            scored(turn_costing(10, 20), 0.9),
            scored(turn_costing(11, 20), 0.8),
        ];

        let (bundle, report) = fill_budget(relevant, recent, &HeuristicEstimator, 50);

        assert_eq!(relevant_ids(&bundle.relevant), vec![10, 11]);
        assert_eq!(ids(&bundle.recent), vec![1]);
        assert_eq!(bundle.token_count, 50);
        assert_eq!(report.recent_dropped, 2);
        assert_eq!(report.relevant_dropped, 0);
    }

    #[test]
    fn token_count_never_exceeds_budget() {
        for budget in [0, 1, 7, 19, 20, 33, 64, 100, 1000] {
            let recent: Vec<Turn> = (1..=6).map(|i| turn_costing(i, 5 + i as usize * 3)).collect();
            let relevant: Vec<ScoredTurn> = (20..=23)
                .map(|i| scored(turn_costing(i, 6 + (i as usize % 4) * 7), 1.0 - i as f32 / 100.0))
                .collect();

            let (bundle, _) = fill_budget(relevant, recent, &HeuristicEstimator, budget);
            assert!(bundle.token_count <= budget, "budget {budget}");

            let recomputed: usize = bundle
                .relevant
                .iter()
                .map(|s| HeuristicEstimator.estimate(&s.turn.combined_text()))
                .chain(
                    bundle
                        .recent
                        .iter()
                        .map(|t| HeuristicEstimator.estimate(&t.combined_text())),
                )
                .sum();
            assert_eq!(recomputed, bundle.token_count);
        }
    }

    #[test]
    fn relevant_fills_before_recent() {
        // Room for exactly one entry: it must come from relevant.
        let recent = vec![turn_costing(1, 10)];
        let relevant = vec![scored(turn_costing(2, 10), 0.7)];

        let (bundle, _) = fill_budget(relevant, recent, &HeuristicEstimator, 15);
        assert_eq!(relevant_ids(&bundle.relevant), vec![2]);
        assert!(bundle.recent.is_empty());
    }

    #[test]
    fn oversized_first_candidate_is_skipped_whole() {
        let relevant = vec![
            scored(turn_costing(1, 80), 0.9),
            scored(turn_costing(2, 5), 0.8),
        ];
        let recent = vec![turn_costing(3, 10)];

        let (bundle, report) = fill_budget(relevant, recent, &HeuristicEstimator, 50);
        // The small relevant turn behind the oversized one is not tried.
        assert!(bundle.relevant.is_empty());
        assert_eq!(report.relevant_dropped, 2);
        assert_eq!(ids(&bundle.recent), vec![3]);
        assert_eq!(bundle.token_count, 10);
    }

    #[test]
    fn recent_stops_at_first_misfit() {
        let recent = vec![turn_costing(1, 10), turn_costing(2, 40), turn_costing(3, 5)];
        let (bundle, _) = fill_budget(Vec::new(), recent, &HeuristicEstimator, 30);
        assert_eq!(ids(&bundle.recent), vec![1]);
    }

    #[test]
    fn duplicate_kept_only_in_relevant() {
        let shared = turn_costing(2, 10);
        let recent = vec![turn_costing(1, 10), shared.clone(), turn_costing(3, 10)];
        let relevant = vec![scored(shared, 0.95)];

        let (bundle, report) = fill_budget(relevant, recent, &HeuristicEstimator, 1000);
        assert_eq!(relevant_ids(&bundle.relevant), vec![2]);
        assert_eq!(ids(&bundle.recent), vec![1, 3]);
        assert_eq!(report.deduplicated, 1);
        assert_eq!(bundle.token_count, 30);
    }

    #[test]
    fn zero_budget_yields_empty_bundle() {
        let (bundle, _) = fill_budget(
            vec![scored(turn_costing(1, 5), 0.5)],
            vec![turn_costing(2, 5)],
            &HeuristicEstimator,
            0,
        );
        assert!(bundle.is_empty());
        assert_eq!(bundle.token_count, 0);
    }

    // ── get_context ────────────────────────────────────────────────────

    #[tokio::test]
    async fn recent_is_chronological() {
        let fx = Fixture::new();
        let base = Utc::now();
        fx.store.append_turn_at("alice", "first", "1", base - ChronoDuration::seconds(30)).await;
        fx.store.append_turn_at("alice", "second", "2", base - ChronoDuration::seconds(20)).await;
        fx.store.append_turn_at("alice", "third", "3", base - ChronoDuration::seconds(10)).await;

        let asm = fx.assembler(MockProvider::new(), config(4000));
        let bundle = asm.get_context("alice", "").await.unwrap();

        let messages: Vec<&str> = bundle.recent.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert!(bundle.recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn recent_limit_keeps_newest() {
        let fx = Fixture::new();
        for i in 0..15 {
            fx.store.append_turn("alice", &format!("m{i}"), "r").await.unwrap();
        }
        let asm = fx.assembler(MockProvider::new(), config(4000));
        let bundle = asm.get_context("alice", "").await.unwrap();
        assert_eq!(bundle.recent.len(), 10);
        assert_eq!(bundle.recent[0].message, "m5");
        assert_eq!(bundle.recent[9].message, "m14");
    }

    #[tokio::test]
    async fn empty_message_skips_semantic_search() {
        let fx = Fixture::new();
        fx.remember("I like tea", "Noted", unit(0)).await;
        let provider = MockProvider::new().with_vector("", unit(0));

        let asm = ContextAssembler::new(
            fx.store.clone(),
            fx.index.clone(),
            Arc::new(provider),
            Arc::new(HeuristicEstimator),
            config(4000),
        );
        let bundle = asm.get_context("alice", "").await.unwrap();
        assert!(bundle.relevant.is_empty());
        assert!(!bundle.relevant_degraded);
        assert_eq!(bundle.recent.len(), 1);

        let bundle = asm.get_context("alice", "   ").await.unwrap();
        assert!(bundle.relevant.is_empty());
    }

    #[tokio::test]
    async fn relevant_sorted_by_descending_score() {
        let fx = Fixture::new();
        let close = fx
            .remember("tea talk", "ok", vec![1.0, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await;
        let far = fx.remember("car talk", "ok", unit(1)).await;
        let mid = fx.remember("herbal", "ok", vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).await;

        let provider = MockProvider::new().with_vector("what tea?", unit(0));
        let mut cfg = config(4000);
        cfg.recent_limit = 1;
        let asm = fx.assembler(provider, cfg);

        let bundle = asm.get_context("alice", "what tea?").await.unwrap();
        assert_eq!(
            relevant_ids(&bundle.relevant),
            vec![close.id.0, mid.id.0, far.id.0]
        );
        assert!(bundle.relevant.windows(2).all(|w| w[0].score >= w[1].score));
        // `mid` is the newest turn, so it was fetched as recent and deduplicated.
        assert!(bundle.recent.is_empty());
    }

    #[tokio::test]
    async fn dedup_prefers_relevant() {
        let fx = Fixture::new();
        let a = fx.remember("alpha", "1", unit(0)).await;
        let b = fx.remember("beta", "2", unit(1)).await;

        let provider = MockProvider::new().with_vector("alpha again", unit(0));
        let mut cfg = config(4000);
        cfg.relevant_limit = 1;
        let asm = fx.assembler(provider, cfg);

        let bundle = asm.get_context("alice", "alpha again").await.unwrap();
        assert_eq!(relevant_ids(&bundle.relevant), vec![a.id.0]);
        assert_eq!(ids(&bundle.recent), vec![b.id.0]);
    }

    #[tokio::test]
    async fn relevant_is_scoped_to_user() {
        let fx = Fixture::new();
        let bob = fx.store.append_turn("bob", "secret plans", "shh").await.unwrap();
        fx.index.add(IndexedMemory::from_turn(&bob, unit(0))).await.unwrap();

        let provider = MockProvider::new().with_vector("plans", unit(0));
        let asm = fx.assembler(provider, config(4000));
        let bundle = asm.get_context("alice", "plans").await.unwrap();
        assert!(bundle.relevant.is_empty());
        assert!(bundle.recent.is_empty());
    }

    #[tokio::test]
    async fn index_failure_degrades_to_recent_only() {
        let store = Arc::new(InMemoryStore::new());
        store.append_turn("alice", "Hello", "Hi").await.unwrap();

        let asm = ContextAssembler::new(
            store,
            Arc::new(FailingIndex::unavailable()),
            Arc::new(MockProvider::new()),
            Arc::new(HeuristicEstimator),
            config(4000),
        );

        let bundle = asm.get_context("alice", "anything").await.unwrap();
        assert_eq!(bundle.recent.len(), 1);
        assert!(bundle.relevant.is_empty());
        assert!(bundle.relevant_degraded);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_recent_only() {
        let fx = Fixture::new();
        fx.remember("Hello", "Hi", unit(0)).await;
        let provider = MockProvider::new().failing_embeddings(ProviderError::RateLimited {
            retry_after_secs: 30,
        });

        let bundle = fx
            .assembler(provider, config(4000))
            .get_context("alice", "Hello")
            .await
            .unwrap();
        assert_eq!(bundle.recent.len(), 1);
        assert!(bundle.relevant.is_empty());
        assert!(bundle.relevant_degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedding_times_out() {
        let fx = Fixture::new();
        fx.remember("Hello", "Hi", unit(0)).await;
        let provider = MockProvider::new().slow_embeddings(Duration::from_secs(60));

        let bundle = fx
            .assembler(provider, config(4000))
            .get_context("alice", "Hello")
            .await
            .unwrap();
        assert!(bundle.relevant_degraded);
        assert_eq!(bundle.recent.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_fatal() {
        let asm = ContextAssembler::new(
            Arc::new(FailingStore),
            Arc::new(InMemoryIndex::new(DIMS)),
            Arc::new(MockProvider::new()),
            Arc::new(HeuristicEstimator),
            config(4000),
        );
        let err = asm.get_context("alice", "hello").await.unwrap_err();
        assert!(matches!(err, ContextError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_configuration_error() {
        let fx = Fixture::new();
        let provider = MockProvider::new().with_dims(3);
        let err = fx
            .assembler(provider, config(4000))
            .get_context("alice", "hello there")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::Configuration(IndexError::DimensionMismatch { expected: 8, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn empty_user_id_rejected() {
        let fx = Fixture::new();
        let err = fx
            .assembler(MockProvider::new(), config(4000))
            .get_context("  ", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn budget_applies_end_to_end() {
        let fx = Fixture::new();
        for i in 0..5 {
            fx.remember(&text_for_tokens(12), "", unit(i % DIMS)).await;
        }
        let provider = MockProvider::new().with_vector("q", unit(0));
        let bundle = fx
            .assembler(provider, config(30))
            .get_context("alice", "q")
            .await
            .unwrap();
        assert!(bundle.token_count <= 30);
        assert_eq!(bundle.len(), 2);
        assert!(!bundle.relevant.is_empty());
    }

    #[tokio::test]
    async fn same_inputs_same_bundle() {
        let fx = Fixture::new();
        for i in 0..6 {
            fx.remember(&format!("note {i}"), "ok", unit(i % 3)).await;
        }
        let asm = fx.assembler(MockProvider::new().with_vector("q", unit(0)), config(60));

        let first = asm.get_context("alice", "q").await.unwrap();
        let second = asm.get_context("alice", "q").await.unwrap();
        assert_eq!(relevant_ids(&first.relevant), relevant_ids(&second.relevant));
        assert_eq!(ids(&first.recent), ids(&second.recent));
        assert_eq!(first.token_count, second.token_count);
    }
}
