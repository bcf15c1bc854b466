//! Errors surfaced by the HTTP layer
//!
//! Validation failures (model, body, auth) are returned before a stream
//! starts, as JSON error bodies. Failures after the backend call has begun are
//! never turned into an HTTP status; the relay renders them as a terminal
//! chunk instead.

use axum::{
    Json,
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// Requested model is not registered
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Body could not be decoded or has no usable messages
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Outbound request could not be composed
    #[error("Request error: {0}")]
    Request(String),

    #[error("Missing or malformed bearer token")]
    Unauthorized,

    #[error("Invalid API key")]
    Forbidden,

    /// Backend answered with a non-2xx status
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Error-coded object in the middle of the event stream
    #[error("{0}")]
    UpstreamBusiness(String),

    /// Connection, timeout or interrupted read
    #[error("Network error: {0}")]
    Network(String),

    /// Undecodable frame; recovered by skipping it
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownModel(_) | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::Request(_) | ProxyError::MalformedFrame(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { .. }
            | ProxyError::UpstreamBusiness(_)
            | ProxyError::Network(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Value of the `type` field in error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::UnknownModel(_) => "unknown_model",
            ProxyError::BadRequest(_) => "invalid_request",
            ProxyError::Unauthorized | ProxyError::Forbidden => "authentication_error",
            ProxyError::Request(_) | ProxyError::MalformedFrame(_) => "proxy_error",
            ProxyError::Upstream { .. }
            | ProxyError::UpstreamBusiness(_)
            | ProxyError::Network(_) => "upstream_error",
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::UnknownModel(_) => "model",
            ProxyError::BadRequest(_) => "request",
            ProxyError::Request(_) => "compose",
            ProxyError::Unauthorized | ProxyError::Forbidden => "auth",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::UpstreamBusiness(_) => "business",
            ProxyError::Network(_) => "network",
            ProxyError::MalformedFrame(_) => "frame",
        }
    }

    /// Text of the terminal chunk a client sees for a mid-stream failure
    pub fn stream_message(&self) -> String {
        match self {
            ProxyError::UpstreamBusiness(message) => format!("upstream error: {message}"),
            other => format!("upstream request failed: {other}"),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
