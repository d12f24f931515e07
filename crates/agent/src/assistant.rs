//! The assistant facade — one call per user message.
//!
//! `process_message` runs the whole pipeline:
//!
//! 1. **Assemble** budgeted history ([`ContextAssembler`])
//! 2. **Gather** profile and pending tasks
//! 3. **Compose** a reply ([`ResponseComposer`])
//! 4. **Write** the turn to store and index ([`MemoryWriter`])
//! 5. **Capture** tasks from the message, count the interaction, and
//!    every N interactions refresh the profile from recent turns
//!
//! If no reply can be produced the configured apology is returned and
//! nothing is persisted. Failures after the reply exists are logged and
//! never cost the user their answer.

use std::sync::Arc;

use buddy_config::AppConfig;
use buddy_core::error::{ContextError, StoreError};
use buddy_core::{
    ContextBundle, ConversationStore, Provider, SemanticIndex, Task, Turn, TurnId, UserProfile,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::composer::{ComposeRequest, ComposerConfig, ResponseComposer};
use crate::context::{AssemblerConfig, ContextAssembler, TokenEstimator};
use crate::conversation::{ConversationLog, ResetError, ResetReport};
use crate::profile::ProfileManager;
use crate::tasks::TaskManager;
use crate::writer::MemoryWriter;

/// Pending tasks shown to the model per reply.
const PROMPT_TASK_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reset(#[from] ResetError),
}

/// Behaviour switches taken from `[assistant]`.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub name: String,
    pub fallback_reply: String,
    pub profile_refresh_every: u64,
    pub extract_tasks: bool,
}

impl AssistantSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.assistant.name.clone(),
            fallback_reply: config.assistant.fallback_reply.clone(),
            profile_refresh_every: config.assistant.profile_refresh_every,
            extract_tasks: config.assistant.extract_tasks,
        }
    }
}

/// What one message produced.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantReply {
    pub text: String,
    /// Set when the turn was persisted.
    pub turn_id: Option<TurnId>,
    /// The model that answered; `None` for the apology.
    pub model: Option<String>,
    /// True when the apology was sent instead of a model reply.
    pub fallback: bool,
    /// History was recency-only because semantic retrieval failed.
    pub degraded: bool,
    pub tasks_recorded: Vec<Task>,
}

pub struct Assistant {
    log: ConversationLog,
    assembler: ContextAssembler,
    composer: ResponseComposer,
    writer: MemoryWriter,
    profiles: ProfileManager,
    tasks: TaskManager,
    settings: AssistantSettings,
}

impl Assistant {
    /// Wire every pipeline component from one configuration.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        index: Arc<dyn SemanticIndex>,
        provider: Arc<dyn Provider>,
        estimator: Arc<dyn TokenEstimator>,
        config: &AppConfig,
    ) -> Self {
        let assembler = ContextAssembler::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            estimator,
            AssemblerConfig::from_config(config),
        );
        let composer = ResponseComposer::new(provider.clone(), ComposerConfig::from_config(config));
        let writer = MemoryWriter::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            config.provider.embedding_model.clone(),
        );
        let profiles =
            ProfileManager::new(store.clone(), provider, config.provider.default_model.clone());
        let tasks = TaskManager::new(store.clone());

        Self {
            log: ConversationLog::new(store, index),
            assembler,
            composer,
            writer,
            profiles,
            tasks,
            settings: AssistantSettings::from_config(config),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Answer one message from `user_id`.
    ///
    /// Errors only for a bad request or a misconfigured index; an
    /// unavailable store or failing models yield the apology reply.
    pub async fn process_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<AssistantReply, AssistantError> {
        let started = std::time::Instant::now();
        info!(user_id, chars = text.chars().count(), "Processing message");

        let bundle = match self.assembler.get_context(user_id, text).await {
            Ok(bundle) => bundle,
            Err(ContextError::StoreUnavailable(e)) => {
                error!(user_id, error = %e, "History unavailable, sending apology");
                return Ok(self.apology());
            }
            Err(e) => return Err(e.into()),
        };

        let profile = self.load_profile(user_id).await;
        let pending = self.load_pending(user_id).await;

        let composition = match self
            .composer
            .compose(ComposeRequest {
                message: text,
                bundle: &bundle,
                profile: profile.as_ref(),
                pending_tasks: &pending,
            })
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(user_id, error = %e, "All models failed, sending apology");
                return Ok(AssistantReply {
                    degraded: bundle.relevant_degraded,
                    ..self.apology()
                });
            }
        };

        let turn_id = match self.writer.update_memory(user_id, text, &composition.reply).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id, error = %e, "Reply sent but turn not stored");
                None
            }
        };

        let tasks_recorded = if self.settings.extract_tasks {
            self.tasks.record(user_id, text).await.unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Could not record tasks");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        self.after_interaction(user_id).await;

        info!(
            user_id,
            model = %composition.model,
            turn_id = ?turn_id,
            tasks = tasks_recorded.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Message processed"
        );

        Ok(AssistantReply {
            text: composition.reply,
            turn_id,
            model: Some(composition.model),
            fallback: false,
            degraded: bundle.relevant_degraded,
            tasks_recorded,
        })
    }

    /// The context that would accompany `text` right now.
    pub async fn preview_context(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<ContextBundle, AssistantError> {
        Ok(self.assembler.get_context(user_id, text).await?)
    }

    /// Most recent turns, oldest first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, AssistantError> {
        Ok(self.log.history(user_id, limit).await?)
    }

    /// Forget the conversation with `user_id`. Profile and tasks stay.
    pub async fn reset_conversation(&self, user_id: &str) -> Result<ResetReport, AssistantError> {
        Ok(self.log.reset(user_id).await?)
    }

    fn apology(&self) -> AssistantReply {
        AssistantReply {
            text: self.settings.fallback_reply.clone(),
            turn_id: None,
            model: None,
            fallback: true,
            degraded: false,
            tasks_recorded: Vec::new(),
        }
    }

    async fn load_profile(&self, user_id: &str) -> Option<UserProfile> {
        match self.profiles.get_or_create(user_id).await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(user_id, error = %e, "Profile unavailable, replying without it");
                None
            }
        }
    }

    async fn load_pending(&self, user_id: &str) -> Vec<Task> {
        self.tasks
            .pending(user_id, PROMPT_TASK_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Tasks unavailable, replying without them");
                Vec::new()
            })
    }

    async fn after_interaction(&self, user_id: &str) {
        let profile = match self.profiles.record_interaction(user_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(user_id, error = %e, "Could not record interaction");
                return;
            }
        };

        let every = self.settings.profile_refresh_every;
        let count = profile.interaction_stats.message_count;
        if every == 0 || count % every != 0 {
            return;
        }

        let recent = match self.log.history(user_id, every as usize).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(user_id, error = %e, "Skipping profile refresh");
                return;
            }
        };
        match self.profiles.refresh(user_id, &recent).await {
            Ok(applied) => debug!(user_id, applied, "Profile refreshed"),
            Err(e) => warn!(user_id, error = %e, "Profile refresh failed"),
        }
    }
}
