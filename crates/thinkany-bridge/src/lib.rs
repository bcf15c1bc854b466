//! thinkany-bridge - OpenAI-compatible proxy for the ThinkAny backend
//!
//! Accepts `/v1/chat/completions` requests, keeps per-session conversation
//! state, forwards each turn to the backend with a rotated credential and
//! translates its event stream back into chat-completion chunks.

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod session;
pub mod translate;
pub mod upstream;

pub use error::BridgeError;
