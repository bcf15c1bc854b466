//! Error types for thinkany-bridge

use thiserror::Error;

/// Main error type for bridge startup and plumbing
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (missing cookies, duplicate models, bad addresses)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream client construction or transport errors outside a request
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Proxy/HTTP server errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
