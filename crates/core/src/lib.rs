//! # Buddy Core
//!
//! Domain types, collaborator traits, and error definitions for the Buddy
//! personal assistant. This crate has **zero framework dependencies**: it
//! defines the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each external collaborator of the context pipeline is a trait here:
//! - [`ConversationStore`] — durable turns, profiles, tasks
//! - [`SemanticIndex`] — nearest-neighbour search over turn embeddings
//! - [`Provider`] — hosted LLM completions and embeddings
//!
//! Implementations live in `buddy-memory` and `buddy-providers`, which keeps
//! the assembler testable against in-memory stubs.

pub mod context;
pub mod error;
pub mod index;
pub mod message;
pub mod profile;
pub mod provider;
pub mod store;
pub mod task;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use context::ContextBundle;
pub use error::{ContextError, IndexError, ProviderError, StoreError};
pub use index::{IndexHit, SemanticIndex};
pub use message::{Message, Role};
pub use profile::{InteractionStats, UserProfile};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
pub use store::ConversationStore;
pub use task::{NewTask, Task, TaskFilter, TaskStatus};
pub use turn::{IndexedMemory, ScoredTurn, Turn, TurnId};
