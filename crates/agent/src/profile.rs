//! Profile manager — what the assistant remembers about the user as facts.
//!
//! Profiles are typed ([`UserProfile`]) but updated through dotted JSON
//! keys, which is also the shape the extraction prompt asks the model to
//! produce: `{"personal_info.birthday": "April 15", "interests": ["chess"]}`.

use std::sync::Arc;

use buddy_core::error::StoreError;
use buddy_core::{ConversationStore, Message, Provider, ProviderRequest, Turn, UserProfile};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const EXTRACTION_SYSTEM: &str = "You extract user profile information from conversations.";
const EXTRACTION_TEMPERATURE: f32 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Profile update rejected: {0}")]
    InvalidUpdate(String),
}

pub struct ProfileManager {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProfileManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
        }
    }

    /// The stored profile, or a freshly stored default one.
    pub async fn get_or_create(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        if let Some(profile) = self.store.fetch_profile(user_id).await? {
            return Ok(profile);
        }
        let profile = UserProfile::new(user_id);
        self.store.store_profile(&profile).await?;
        debug!(user_id, "Created default profile");
        Ok(profile)
    }

    /// Apply dotted-key updates and persist the result.
    ///
    /// `interests` merges into the set and accepts a string or an array.
    /// `user_id` cannot be changed. Keys whose path runs through a
    /// non-object value are skipped.
    pub async fn apply_updates(
        &self,
        user_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<UserProfile, ProfileError> {
        let current = self.get_or_create(user_id).await?;
        let updated = merge_updates(current, updates)?;
        self.store.store_profile(&updated).await?;
        info!(user_id, keys = updates.len(), "Profile updated");
        Ok(updated)
    }

    /// Count one more interaction and stamp its time.
    pub async fn record_interaction(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        let mut profile = self.get_or_create(user_id).await?;
        let now = Utc::now();
        let stats = &mut profile.interaction_stats;
        stats.message_count += 1;
        stats.first_interaction.get_or_insert(now);
        stats.last_interaction = Some(now);
        self.store.store_profile(&profile).await?;
        Ok(profile)
    }

    /// Ask the model for profile facts found in `turns`.
    ///
    /// Never fails: a provider error or an unparseable reply gives an
    /// empty object.
    pub async fn extract_updates(&self, turns: &[Turn]) -> Map<String, Value> {
        if turns.is_empty() {
            return Map::new();
        }

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(EXTRACTION_SYSTEM),
                Message::user(extraction_prompt(turns)),
            ],
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: None,
        };

        match self.provider.complete(request).await {
            Ok(response) => parse_embedded_object(&response.content).unwrap_or_else(|| {
                warn!("Profile extraction reply held no JSON object");
                Map::new()
            }),
            Err(e) => {
                warn!(error = %e, "Profile extraction failed");
                Map::new()
            }
        }
    }

    /// Extract facts from `turns` and apply them. Returns how many keys
    /// were applied.
    pub async fn refresh(&self, user_id: &str, turns: &[Turn]) -> Result<usize, ProfileError> {
        let updates = self.extract_updates(turns).await;
        if updates.is_empty() {
            return Ok(0);
        }
        self.apply_updates(user_id, &updates).await?;
        Ok(updates.len())
    }
}

// ── Update merging ────────────────────────────────────────────────────────

fn merge_updates(
    profile: UserProfile,
    updates: &Map<String, Value>,
) -> Result<UserProfile, ProfileError> {
    let user_id = profile.user_id.clone();
    let mut interests = profile.interests.clone();
    let mut doc = serde_json::to_value(&profile)
        .map_err(|e| ProfileError::InvalidUpdate(e.to_string()))?;

    for (key, value) in updates {
        match key.as_str() {
            "user_id" => warn!(user_id = %user_id, "Ignoring update to user_id"),
            "interests" => merge_interests(&mut interests, value),
            _ => {
                if !set_dotted(&mut doc, key, value.clone()) {
                    warn!(key = %key, "Skipping update through a non-object field");
                }
            }
        }
    }

    let mut updated: UserProfile =
        serde_json::from_value(doc).map_err(|e| ProfileError::InvalidUpdate(e.to_string()))?;
    updated.interests = interests;
    Ok(updated)
}

fn merge_interests(interests: &mut std::collections::BTreeSet<String>, value: &Value) {
    match value {
        Value::String(s) => {
            interests.insert(s.clone());
        }
        Value::Array(items) => {
            interests.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
        }
        other => warn!(value = %other, "Ignoring interests update that is not text"),
    }
}

/// Set `path` (dot separated) inside `doc`, creating missing objects.
/// Returns false if an existing non-object value is in the way.
fn set_dotted(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return false;
    };

    let mut current = doc;
    for part in parts {
        let Value::Object(map) = current else {
            return false;
        };
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match current {
        Value::Object(map) => {
            map.insert(leaf.to_string(), value);
            true
        }
        _ => false,
    }
}

// ── Extraction ────────────────────────────────────────────────────────────

fn extraction_prompt(turns: &[Turn]) -> String {
    let conversation: Vec<String> = turns
        .iter()
        .flat_map(|t| [format!("User: {}", t.message), format!("Assistant: {}", t.response)])
        .collect();

    format!(
        "Based on the following conversation, extract any personal information about the user \
         that should be remembered for future interactions. This could include preferences, \
         interests, important dates, relationships, or other personal details.\n\n\
         Return the information as a JSON object with keys representing the profile fields, \
         or an empty JSON object if no relevant information is found.\n\n\
         Example format:\n\
         {{\n  \"personal_info.birthday\": \"April 15, 1985\",\n  \
         \"interests\": [\"hiking\", \"photography\"],\n  \
         \"relationships.mother\": \"Maria\"\n}}\n\n\
         Conversation:\n{}",
        conversation.join("\n")
    )
}

/// Parse the outermost `{...}` in `text` as a JSON object.
pub fn parse_embedded_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Embedded JSON did not parse");
            None
        }
    }
}
