//! OpenAI-compatible output framing
//!
//! Pure formatting: fragments in, `data: ...` frames out. One emitter is
//! created per response so every chunk shares the same id and timestamp.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::translate::Fragment;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
const FINISH_STOP: &str = "stop";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Aggregated response for `"stream": false`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    id: String,
    model: String,
    created: i64,
}

impl ChunkEmitter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Error and stop fragments carry `finish_reason: "stop"`
    pub fn chunk(&self, fragment: &Fragment) -> ChatCompletionChunk {
        let finish_reason = fragment.is_terminal().then(|| FINISH_STOP.to_string());
        let delta = Delta {
            content: fragment.text().map(str::to_string),
        };

        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// `data: <json>\n\n`
    pub fn frame(&self, fragment: &Fragment) -> Bytes {
        // A struct of strings and integers always serializes
        let json = serde_json::to_string(&self.chunk(fragment)).unwrap_or_default();
        Bytes::from(format!("data: {json}\n\n"))
    }

    pub fn done_frame(&self) -> Bytes {
        Bytes::from_static(DONE_FRAME.as_bytes())
    }

    pub fn completion(&self, content: String) -> ChatCompletion {
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: FINISH_STOP.to_string(),
            }],
        }
    }
}
