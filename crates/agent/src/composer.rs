//! Response composer — turns an assembled context into a model reply.
//!
//! The composer lays the context out as a stack of system messages
//! followed by the user's message, then calls the provider once. Model
//! fallback is the provider's concern (see `FallbackProvider`), so a
//! failure here means every configured model failed.
//!
//! # Prompt layout
//!
//! 1. System prompt
//! 2. User profile (pretty JSON)
//! 3. Current date and time
//! 4. Pending tasks
//! 5. Recent conversation history, oldest first
//! 6. Relevant past conversations, separated by `---`
//! 7. The user's message
//!
//! Sections with nothing to say are left out.

use std::sync::Arc;

use buddy_config::AppConfig;
use buddy_core::error::ProviderError;
use buddy_core::{ContextBundle, Message, Provider, ProviderRequest, Task, Usage, UserProfile};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Model and prompt settings for composition.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl ComposerConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.default_model.clone(),
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
            system_prompt: config.assistant.system_prompt.clone(),
        }
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything the composer needs for one reply.
#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    pub message: &'a str,
    pub bundle: &'a ContextBundle,
    pub profile: Option<&'a UserProfile>,
    pub pending_tasks: &'a [Task],
}

/// A generated reply.
#[derive(Debug, Clone)]
pub struct Composition {
    pub reply: String,
    /// The model that actually answered.
    pub model: String,
    pub usage: Option<Usage>,
}

pub struct ResponseComposer {
    provider: Arc<dyn Provider>,
    config: ComposerConfig,
}

impl ResponseComposer {
    pub fn new(provider: Arc<dyn Provider>, config: ComposerConfig) -> Self {
        Self { provider, config }
    }

    pub async fn compose(&self, request: ComposeRequest<'_>) -> Result<Composition, ProviderError> {
        let messages = build_messages(&self.config.system_prompt, &request, Utc::now());
        debug!(
            model = %self.config.model,
            messages = messages.len(),
            recent = request.bundle.recent.len(),
            relevant = request.bundle.relevant.len(),
            "Composing reply"
        );

        let provider_request = ProviderRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
        };

        let response = self.provider.complete(provider_request).await?;
        info!(
            model = %response.model,
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "Reply generated"
        );

        Ok(Composition {
            reply: response.content,
            model: response.model,
            usage: response.usage,
        })
    }
}

// ── Prompt building ───────────────────────────────────────────────────────

/// Lay out the prompt for one request at time `now`.
pub fn build_messages(
    system_prompt: &str,
    request: &ComposeRequest<'_>,
    now: DateTime<Utc>,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];

    if let Some(profile) = request.profile {
        if let Ok(json) = serde_json::to_string_pretty(profile) {
            messages.push(Message::system(format!("User profile information:\n{json}")));
        }
    }

    messages.push(Message::system(format!(
        "Current date and time: {}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )));

    if !request.pending_tasks.is_empty() {
        let lines: Vec<String> = request.pending_tasks.iter().map(task_line).collect();
        messages.push(Message::system(format!("Pending tasks:\n{}", lines.join("\n"))));
    }

    if !request.bundle.recent.is_empty() {
        let history: Vec<String> = request
            .bundle
            .recent
            .iter()
            .flat_map(|t| [format!("User: {}", t.message), format!("Assistant: {}", t.response)])
            .collect();
        messages.push(Message::system(format!(
            "Recent conversation history:\n{}",
            history.join("\n")
        )));
    }

    if !request.bundle.relevant.is_empty() {
        let memories: Vec<String> = request
            .bundle
            .relevant
            .iter()
            .map(|s| s.turn.combined_text())
            .collect();
        messages.push(Message::system(format!(
            "Relevant past conversations:\n{}",
            memories.join("\n---\n")
        )));
    }

    messages.push(Message::user(request.message));
    messages
}

fn task_line(task: &Task) -> String {
    match &task.due {
        Some(due) => format!("- {} (due {due})", task.description),
        None => format!("- {}", task.description),
    }
}
