//! Conversation store and semantic index implementations for Buddy.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::{InMemoryIndex, InMemoryStore};
pub use vector::{cosine_similarity, rank_nearest, similarity_score};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteIndex, SqliteStore};
