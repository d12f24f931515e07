//! Conversation turns and their indexed form.
//!
//! A [`Turn`] is one message/response exchange. It is immutable once the
//! store has assigned its [`TurnId`]. The semantic index keeps an
//! [`IndexedMemory`] per turn, keyed by that same id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const USER_PREFIX: &str = "User: ";
const ASSISTANT_DELIMITER: &str = "\nAssistant: ";

/// Durable identifier of a stored turn (the store's row sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnId(pub i64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user message and the assistant's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub user_id: String,
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Canonical two-line rendering used for embedding and budgeting.
    pub fn combined_text(&self) -> String {
        render_combined(&self.message, &self.response)
    }
}

/// A turn retrieved by similarity, with its score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTurn {
    pub turn: Turn,
    pub score: f32,
}

/// The index-side record for a turn.
///
/// `message` and `response` are kept as separate fields so retrieval never
/// has to split `combined_text`. Records written before that upgrade carry
/// only the combined form; [`IndexedMemory::to_turn`] recovers those.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedMemory {
    pub turn_id: TurnId,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub combined_text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl IndexedMemory {
    /// Build the index record for a freshly stored turn.
    pub fn from_turn(turn: &Turn, embedding: Vec<f32>) -> Self {
        Self {
            turn_id: turn.id,
            user_id: turn.user_id.clone(),
            message: Some(turn.message.clone()),
            response: Some(turn.response.clone()),
            timestamp: turn.timestamp,
            combined_text: turn.combined_text(),
            embedding,
        }
    }

    /// Recover the turn this record describes.
    pub fn to_turn(&self) -> Turn {
        let (message, response) = match (&self.message, &self.response) {
            (Some(m), Some(r)) => (m.clone(), r.clone()),
            _ => parse_combined(&self.combined_text),
        };
        Turn {
            id: self.turn_id,
            user_id: self.user_id.clone(),
            message,
            response,
            timestamp: self.timestamp,
        }
    }
}

/// Render `"User: {message}\nAssistant: {response}"`.
pub fn render_combined(message: &str, response: &str) -> String {
    format!("{USER_PREFIX}{message}{ASSISTANT_DELIMITER}{response}")
}

/// Invert [`render_combined`] for legacy records.
///
/// The split is only trusted when the text has exactly one delimiter and the
/// message part carries no stray `"User: "` marker. Anything else is
/// ambiguous: the whole text becomes the message and the response is empty,
/// so history is kept rather than dropped.
pub fn parse_combined(text: &str) -> (String, String) {
    let unambiguous = text.starts_with(USER_PREFIX)
        && text.matches(ASSISTANT_DELIMITER).count() == 1;
    if unambiguous {
        if let Some((head, response)) = text.split_once(ASSISTANT_DELIMITER) {
            let message = &head[USER_PREFIX.len()..];
            if !message.contains(USER_PREFIX) {
                return (message.to_string(), response.to_string());
            }
        }
    }
    tracing::debug!(len = text.len(), "Combined text not splittable, keeping it whole");
    (text.to_string(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(message: &str, response: &str) -> Turn {
        Turn {
            id: TurnId(7),
            user_id: "alice".into(),
            message: message.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn combined_text_format() {
        let t = turn("Hello", "Hi there");
        assert_eq!(t.combined_text(), "User: Hello\nAssistant: Hi there");
    }

    #[test]
    fn parse_round_trips_plain_text() {
        let (m, r) = parse_combined("User: Hello\nAssistant: Hi there");
        assert_eq!(m, "Hello");
        assert_eq!(r, "Hi there");
    }

    #[test]
    fn parse_keeps_ambiguous_text_whole() {
        let text = render_combined("quote: \nAssistant: fake", "real");
        let (m, r) = parse_combined(&text);
        assert_eq!(m, text);
        assert!(r.is_empty());
    }

    #[test]
    fn parse_without_prefix_keeps_text_whole() {
        let (m, r) = parse_combined("just some note");
        assert_eq!(m, "just some note");
        assert!(r.is_empty());
    }

    #[test]
    fn structured_fields_win_over_combined_text() {
        let t = turn("User: nested\nAssistant: markers", "fine");
        let record = IndexedMemory::from_turn(&t, vec![1.0]);
        let back = record.to_turn();
        assert_eq!(back.message, "User: nested\nAssistant: markers");
        assert_eq!(back.response, "fine");
        assert_eq!(back.id, TurnId(7));
    }

    #[test]
    fn legacy_record_falls_back_to_parsing() {
        let record = IndexedMemory {
            turn_id: TurnId(1),
            user_id: "bob".into(),
            message: None,
            response: None,
            timestamp: Utc::now(),
            combined_text: "User: ping\nAssistant: pong".into(),
            embedding: vec![],
        };
        let t = record.to_turn();
        assert_eq!(t.message, "ping");
        assert_eq!(t.response, "pong");
    }
}
