//! Startup wiring shared by the commands.
//!
//! Everything with a lifetime longer than one message (store, index,
//! provider) is built here once and handed down as trait objects.

use std::sync::Arc;

use buddy_agent::{Assistant, estimator_for};
use buddy_config::AppConfig;
use buddy_core::{ConversationStore, Provider, SemanticIndex};
use buddy_memory::{InMemoryIndex, InMemoryStore, SqliteIndex, SqliteStore};

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Store and index for the configured backend.
pub struct Memory {
    pub store: Arc<dyn ConversationStore>,
    pub index: Arc<dyn SemanticIndex>,
    sqlite: Option<Arc<SqliteStore>>,
}

impl Memory {
    /// Flush and close the database, if there is one.
    pub async fn close(&self) {
        if let Some(store) = &self.sqlite {
            store.close().await;
        }
    }
}

pub fn load_config() -> CmdResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub async fn open_memory(config: &AppConfig) -> CmdResult<Memory> {
    let dims = config.memory.embedding_dimensions;
    match config.memory.backend.as_str() {
        "in_memory" => {
            tracing::warn!("Using in-memory backend, nothing will be kept after exit");
            Ok(Memory {
                store: Arc::new(InMemoryStore::new()),
                index: Arc::new(InMemoryIndex::new(dims)),
                sqlite: None,
            })
        }
        _ => {
            let path = config.database_path();
            let store = Arc::new(SqliteStore::open(&path).await?);
            let index = SqliteIndex::new(store.pool().clone(), dims)
                .await
                .map_err(|e| format!("{e}. Was memory.embedding_dimensions changed?"))?;
            tracing::debug!(path = %path.display(), dims, "Opened SQLite memory");
            Ok(Memory {
                store: store.clone(),
                index: Arc::new(index),
                sqlite: Some(store),
            })
        }
    }
}

pub fn open_provider(config: &AppConfig) -> CmdResult<Arc<dyn Provider>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    BUDDY_API_KEY=sk-...    (takes precedence)");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
    }
    Ok(buddy_providers::build_from_config(config)?)
}

pub fn build_assistant(
    config: &AppConfig,
    memory: &Memory,
    provider: Arc<dyn Provider>,
) -> Assistant {
    Assistant::new(
        memory.store.clone(),
        memory.index.clone(),
        provider,
        estimator_for(&config.context.tokenizer),
        config,
    )
}
