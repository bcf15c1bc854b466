//! Translation of the backend event stream into chat-completion fragments

mod event;
mod render;
mod translator;

pub use event::{
    BUSINESS_ERROR_CODE, ChunkChoice, ChunkDelta, EventMetadata, RagResult, SearchMessage,
    UpstreamEvent, business_error,
};
pub use render::BlockRenderer;
pub use translator::{Fragment, Latch, StreamTranslator, Termination};
