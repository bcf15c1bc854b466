//! OpenAI-compatible HTTP surface
//!
//! Request validation, bearer auth, the streaming relay and the output
//! framing that turns translated fragments into chat-completion chunks.

mod auth;
mod chunk;
mod error;
mod relay;
mod server;
pub mod types;

pub use auth::{check_bearer, require_bearer};
pub use chunk::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChunkChoice, ChunkEmitter,
    CompletionChoice, DONE_FRAME, Delta,
};
pub use error::ProxyError;
pub use relay::{Exchange, Relay, aggregate, sse_body};
pub use server::{AppState, ProxyServer, create_router};
