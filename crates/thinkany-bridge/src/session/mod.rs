//! Per-client conversation state
//!
//! A session is keyed by the client's `user` field and points at an upstream
//! conversation. The turns exchanged so far belong to that conversation.

mod store;

pub use store::{ConversationStore, DEFAULT_MAX_SESSIONS};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longer `user` values are replaced by a digest
const MAX_SESSION_ID_LEN: usize = 256;

/// Prefix of locally generated conversation handles
const CONVERSATION_PREFIX: &str = "m-";

/// Errors that can occur during session ID validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    /// Session ID is empty or whitespace
    #[error("Session ID cannot be empty")]
    Empty,
}

/// A validated client session ID
///
/// Taken from the OpenAI `user` field, so any non-blank text is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh ID for requests that do not carry one
    pub fn generate() -> Self {
        SessionId(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session ID for an OpenAI `user` value; blank values have none
    ///
    /// Any other text is accepted. Values over the length limit map to a
    /// stable name-based UUID, so one long value is still one session.
    pub fn from_user(user: &str) -> Option<Self> {
        if user.trim().is_empty() {
            return None;
        }
        if user.len() > MAX_SESSION_ID_LEN {
            let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, user.as_bytes());
            return Some(SessionId(format!("user-{}", digest.simple())));
        }
        Some(SessionId(user.to_string()))
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_user(value).ok_or(SessionIdError::Empty)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_user(&value).ok_or(SessionIdError::Empty)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque upstream conversation handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// `m-` followed by 32 lowercase hex digits of a v4 UUID
    pub fn generate() -> Self {
        ConversationId(format!(
            "{CONVERSATION_PREFIX}{}",
            Uuid::new_v4().simple()
        ))
    }

    /// Whether `s` has the shape produced by [`ConversationId::generate`]
    pub fn is_well_formed(s: &str) -> bool {
        match s.strip_prefix(CONVERSATION_PREFIX) {
            Some(hex) => {
                hex.len() == 32
                    && hex
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            }
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        ConversationId(value)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored turn; either field may be missing on turns copied from clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Option<String>,
    pub content: Option<String>,
}

impl HistoryTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            content: Some(content.into()),
        }
    }

    /// The turn as a context message, if both fields are present
    pub fn to_context(&self) -> Option<ContextMessage> {
        Some(ContextMessage {
            role: self.role.clone()?,
            content: self.content.clone()?,
        })
    }
}

/// A `{role, content}` pair as the backend expects in `ctx_msgs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

/// Everything remembered about one client session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub conversation_id: Option<ConversationId>,
    pub history: Vec<HistoryTurn>,
}

impl Session {
    /// Prior turns usable as backend context
    pub fn context_messages(&self) -> Vec<ContextMessage> {
        self.history.iter().filter_map(HistoryTurn::to_context).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_valid_session_ids() {
        assert!(SessionId::try_from("project-abc").is_ok());
        assert!(SessionId::try_from("user@example.com").is_ok());
        assert!(SessionId::try_from("has spaces").is_ok());
        assert!(SessionId::try_from("a").is_ok());
    }

    #[test]
    fn test_empty_session_id() {
        assert!(matches!(SessionId::try_from(""), Err(SessionIdError::Empty)));
        assert!(matches!(
            SessionId::try_from("   "),
            Err(SessionIdError::Empty)
        ));
    }

    #[test]
    fn test_session_id_with_control_chars() {
        let id = SessionId::try_from("line\nbreak").unwrap();
        assert_eq!(id.as_str(), "line\nbreak");
    }

    #[test]
    fn test_long_session_id_is_digested() {
        let max_id = "a".repeat(MAX_SESSION_ID_LEN);
        assert_eq!(SessionId::try_from(max_id.as_str()).unwrap().as_str(), max_id);

        let long_id = "a".repeat(MAX_SESSION_ID_LEN + 1);
        let first = SessionId::from_user(&long_id).unwrap();
        assert!(first.as_str().starts_with("user-"));
        assert!(first.as_str().len() <= MAX_SESSION_ID_LEN);
        assert_eq!(Some(first), SessionId::from_user(&long_id));

        let other = SessionId::from_user(&"b".repeat(MAX_SESSION_ID_LEN + 1)).unwrap();
        assert_ne!(SessionId::from_user(&long_id), Some(other));
    }

    #[test]
    fn test_generated_session_id() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("session-"));
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_conversation_id_shape() {
        let id = ConversationId::generate();
        assert!(ConversationId::is_well_formed(id.as_str()));
        assert!(!ConversationId::is_well_formed("m-XYZ"));
        assert!(!ConversationId::is_well_formed("x-0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn test_conversation_ids_are_unique() {
        let ids: HashSet<ConversationId> =
            (0..10_000).map(|_| ConversationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_context_messages_drop_incomplete_turns() {
        let session = Session {
            conversation_id: None,
            history: vec![
                HistoryTurn::new("user", "hi"),
                HistoryTurn {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                HistoryTurn {
                    role: None,
                    content: Some("orphan".to_string()),
                },
                HistoryTurn::new("assistant", "hello"),
            ],
        };

        let context = session.context_messages();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "hi");
        assert_eq!(context[1].role, "assistant");
    }
}
