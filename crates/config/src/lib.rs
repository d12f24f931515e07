//! Configuration loading, validation, and management for Buddy.
//!
//! Loads configuration from `~/.buddy/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.buddy/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion/embedding provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Where the database lives (defaults to the config directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Provider and model settings
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Context assembly budget and retrieval limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Persisted store and semantic index settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Assistant persona and behaviour
    #[serde(default)]
    pub assistant: AssistantConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("data_dir", &self.data_dir)
            .field("provider", &self.provider)
            .field("context", &self.context)
            .field("memory", &self.memory)
            .field("assistant", &self.assistant)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Tried once when the default model fails
    #[serde(default = "default_fallback_model", skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-attempt timeout for completion calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4-turbo".into()
}
fn default_fallback_model() -> Option<String> {
    Some("gpt-3.5-turbo".into())
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            default_model: default_model(),
            fallback_model: default_fallback_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Upper bound on the estimated tokens of assembled history
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Most recent turns fetched per request
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Nearest neighbours fetched per request
    #[serde(default = "default_relevant_limit")]
    pub relevant_limit: usize,

    /// Bound on embed + index query before degrading to recency-only
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    /// "cl100k" (BPE) or "heuristic" (chars / 4)
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_max_context_tokens() -> usize {
    4000
}
fn default_recent_limit() -> usize {
    10
}
fn default_relevant_limit() -> usize {
    5
}
fn default_retrieval_timeout_ms() -> u64 {
    5000
}
fn default_tokenizer() -> String {
    "cl100k".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            recent_limit: default_recent_limit(),
            relevant_limit: default_relevant_limit(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            tokenizer: default_tokenizer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Database file name inside the data directory
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Must match the embedding model's output length
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Index leftover unindexed turns at startup
    #[serde(default = "default_true")]
    pub reindex_on_start: bool,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_database_file() -> String {
    "memory.sqlite".into()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            database_file: default_database_file(),
            embedding_dimensions: default_embedding_dimensions(),
            reindex_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sent to the user when every model attempt failed
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Refresh the profile from conversation every N turns (0 = never)
    #[serde(default = "default_profile_refresh_every")]
    pub profile_refresh_every: u64,

    /// Pull "remind me to …" style tasks out of user messages
    #[serde(default = "default_true")]
    pub extract_tasks: bool,
}

fn default_assistant_name() -> String {
    "Buddy".into()
}
fn default_system_prompt() -> String {
    "You are Buddy, a personal AI assistant with a natural, friendly personality. \
     You help the user with daily tasks, answer questions, provide recommendations, \
     and engage in conversation."
        .into()
}
fn default_fallback_reply() -> String {
    "I'm sorry, I'm having trouble generating a response right now. Could you try again?".into()
}
fn default_profile_refresh_every() -> u64 {
    5
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            system_prompt: default_system_prompt(),
            fallback_reply: default_fallback_reply(),
            profile_refresh_every: default_profile_refresh_every(),
            extract_tasks: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.buddy/config.toml).
    ///
    /// Environment variables override the file:
    /// - `BUDDY_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `BUDDY_MODEL`
    /// - `BUDDY_DATA_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("BUDDY_API_KEY").or_else(|| {
            if self.api_key.is_none() {
                lookup("OPENAI_API_KEY")
            } else {
                None
            }
        }) {
            self.api_key = Some(key);
        }

        if let Some(model) = lookup("BUDDY_MODEL") {
            self.provider.default_model = model;
        }

        if let Some(dir) = lookup("BUDDY_DATA_DIR") {
            self.data_dir = Some(dir);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".buddy")
    }

    /// Directory holding the database.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_dir)
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.memory.database_file)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.context.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_context_tokens must be > 0".into(),
            ));
        }

        if self.context.recent_limit == 0 {
            return Err(ConfigError::ValidationError(
                "context.recent_limit must be > 0".into(),
            ));
        }

        if self.memory.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "memory.embedding_dimensions must be > 0".into(),
            ));
        }

        if !matches!(self.context.tokenizer.as_str(), "cl100k" | "heuristic") {
            return Err(ConfigError::ValidationError(format!(
                "context.tokenizer must be \"cl100k\" or \"heuristic\", got \"{}\"",
                self.context.tokenizer
            )));
        }

        if !matches!(self.memory.backend.as_str(), "sqlite" | "in_memory") {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be \"sqlite\" or \"in_memory\", got \"{}\"",
                self.memory.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            data_dir: None,
            provider: ProviderSettings::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
