//! Typed upstream events
//!
//! Frames are untyped JSON distinguished by their `object` field. They are
//! decoded into a closed set of variants; anything unrecognised, including a
//! frame with no `object` at all, becomes [`UpstreamEvent::Unknown`].
//!
//! Fields inside a recognised frame are decoded leniently: a field of the
//! wrong type reads as absent instead of rejecting the whole frame, and
//! scalar titles or links are kept as text.

use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};
use serde_json::Value;

/// `code` value the backend uses for business errors
pub const BUSINESS_ERROR_CODE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "object")]
pub enum UpstreamEvent {
    /// Search pipeline progress: sub-queries and retrieved sources
    #[serde(rename = "stream.event")]
    StreamEvent {
        #[serde(default, deserialize_with = "lenient")]
        metadata: Option<EventMetadata>,
    },
    /// A delta of the answer text
    #[serde(rename = "chat.completion.chunk")]
    CompletionChunk {
        #[serde(default, deserialize_with = "lenient_list")]
        choices: Option<Vec<ChunkChoice>>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub msg: Option<SearchMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchMessage {
    #[serde(default, deserialize_with = "lenient_texts")]
    pub questions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub rag_results: Option<Vec<RagResult>>,
}

/// One cited source
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RagResult {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default, deserialize_with = "lenient")]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,
}

/// Scalars as text; objects, arrays and null have none
fn text_of(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A nested object; a type mismatch reads as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(text_of))
}

/// A list of scalars; non-scalar items are dropped
fn lenient_texts<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(items.into_iter().filter_map(text_of).collect()),
        _ => None,
    })
}

/// A list of objects; items that do not decode are dropped
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

impl UpstreamEvent {
    /// Decode one frame payload (the text after `data:`)
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(payload)?;
        if !value.get("object").is_some_and(Value::is_string) {
            return Ok(UpstreamEvent::Unknown);
        }
        serde_json::from_value(value)
    }

    /// Non-empty sub-query list of a stream event
    pub fn questions(&self) -> Option<&[String]> {
        match self {
            UpstreamEvent::StreamEvent { metadata } => metadata
                .as_ref()?
                .msg
                .as_ref()?
                .questions
                .as_deref()
                .filter(|q| !q.is_empty()),
            _ => None,
        }
    }

    /// Non-empty source list of a stream event
    pub fn rag_results(&self) -> Option<&[RagResult]> {
        match self {
            UpstreamEvent::StreamEvent { metadata } => metadata
                .as_ref()?
                .msg
                .as_ref()?
                .rag_results
                .as_deref()
                .filter(|r| !r.is_empty()),
            _ => None,
        }
    }

    /// Non-empty delta text of the first choice
    pub fn delta_content(&self) -> Option<&str> {
        match self {
            UpstreamEvent::CompletionChunk { choices } => choices
                .as_ref()?
                .first()?
                .delta
                .as_ref()?
                .content
                .as_deref()
                .filter(|c| !c.is_empty()),
            _ => None,
        }
    }
}

/// Message of a bare `{"code": -1, ...}` line, if the line is one
pub fn business_error(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("code").and_then(Value::as_i64) != Some(BUSINESS_ERROR_CODE) {
        return None;
    }
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown upstream error");
    Some(message.to_string())
}
