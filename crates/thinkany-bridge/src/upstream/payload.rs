//! Backend request composition
//!
//! Decides between starting a new upstream conversation and continuing the
//! one remembered for the session, and builds the JSON body accordingly.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Mode, ModelSpec};
use crate::proxy::ProxyError;
use crate::proxy::types::ChatMessage;
use crate::session::{ContextMessage, ConversationId, ConversationStore, HistoryTurn, Session, SessionId};

/// JSON body of `POST /api/chat/completions`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpstreamPayload {
    pub conv_uuid: ConversationId,
    pub uuid: String,
    pub role: String,
    pub content: String,
    pub llm_model: String,
    pub locale: String,
    pub mode: Mode,
    pub source: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_msg_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx_msgs: Option<Vec<ContextMessage>>,
}

/// A composed request plus what is needed to commit the exchange afterwards
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub payload: UpstreamPayload,
    pub is_new: bool,
    /// Session snapshot taken when the request was built
    pub session: Session,
    /// Client turns to append to history once the answer is complete
    pub pending_turns: Vec<HistoryTurn>,
}

impl BuiltRequest {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.payload.conv_uuid
    }

    /// The session record to store after a successful exchange
    pub fn committed_session(&self, answer: String) -> Session {
        let mut history = self.session.history.clone();
        history.extend(self.pending_turns.iter().cloned());
        history.push(HistoryTurn::new("assistant", answer));
        Session {
            conversation_id: Some(self.payload.conv_uuid.clone()),
            history,
        }
    }
}

fn action(is_new: bool, mode: Mode) -> String {
    let verb = if is_new { "init" } else { "append" };
    format!("{verb}_{mode}")
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    store: Arc<ConversationStore>,
    locale: String,
}

impl RequestBuilder {
    pub fn new(store: Arc<ConversationStore>, locale: impl Into<String>) -> Self {
        Self {
            store,
            locale: locale.into(),
        }
    }

    pub async fn build(
        &self,
        session_id: &SessionId,
        messages: &[ChatMessage],
        model: &ModelSpec,
    ) -> Result<BuiltRequest, ProxyError> {
        let last = messages
            .last()
            .ok_or_else(|| ProxyError::BadRequest("messages cannot be empty".to_string()))?;
        let content = last.text().ok_or_else(|| {
            ProxyError::BadRequest("the last message has no text content".to_string())
        })?;

        // History comes from the handle, shared by every session bound to it
        let session = self.store.get(session_id).await.unwrap_or_default();

        let (conv_uuid, is_new) = match &session.conversation_id {
            Some(id) => (id.clone(), false),
            None => {
                let id = ConversationId::generate();
                tracing::info!("New session {session_id}, generated conversation {id}");
                (id, true)
            }
        };

        let (target_msg_uuid, ctx_msgs, pending_turns) = if is_new {
            let turns = messages.iter().map(ChatMessage::to_history).collect();
            (Some(String::new()), None, turns)
        } else {
            (None, Some(session.context_messages()), vec![last.to_history()])
        };

        let payload = UpstreamPayload {
            conv_uuid,
            uuid: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            content,
            llm_model: model.upstream_model.clone(),
            locale: self.locale.clone(),
            mode: model.mode,
            source: "all".to_string(),
            action: action(is_new, model.mode),
            target_msg_uuid,
            ctx_msgs,
        };

        Ok(BuiltRequest {
            payload,
            is_new,
            session,
            pending_turns,
        })
    }
}
