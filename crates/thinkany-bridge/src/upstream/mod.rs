//! Everything that talks to the backend: credentials, payloads, transport

mod client;
mod credentials;
mod payload;

pub use client::{LineStream, UpstreamClient, split_lines};
pub use credentials::{Credential, CredentialRotator};
pub use payload::{BuiltRequest, RequestBuilder, UpstreamPayload};
