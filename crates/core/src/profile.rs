//! User profile — what the assistant knows about a person.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's profile.
///
/// Well-known sections are typed; everything else the extractor learns
/// (personal info, important dates, relationships) lives in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub preferences: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub interests: BTreeSet<String>,

    #[serde(default)]
    pub interaction_stats: InteractionStats,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_name() -> String {
    "User".into()
}

/// Counters maintained on every completed exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionStats {
    #[serde(default)]
    pub message_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_interaction: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// The profile a new user starts with.
    pub fn new(user_id: impl Into<String>) -> Self {
        let mut extra = serde_json::Map::new();
        for section in ["personal_info", "important_dates", "relationships"] {
            extra.insert(section.into(), serde_json::Value::Object(serde_json::Map::new()));
        }
        Self {
            user_id: user_id.into(),
            name: default_name(),
            preferences: BTreeMap::new(),
            interests: BTreeSet::new(),
            interaction_stats: InteractionStats::default(),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_has_sections() {
        let p = UserProfile::new("alice");
        assert_eq!(p.name, "User");
        assert!(p.extra.contains_key("personal_info"));
        assert!(p.extra.contains_key("relationships"));
    }

    #[test]
    fn extra_fields_flatten_round_trip() {
        let mut p = UserProfile::new("alice");
        p.extra.insert("pets".into(), serde_json::json!({"dog": "Rex"}));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["pets"]["dog"], "Rex");
        let back: UserProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
