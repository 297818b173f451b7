//! Error types for the ARI proxy core
//!
//! Queue-level failures are reported as [`TransportError`]; everything else
//! surfaces as a [`ProxyError`]. A failed dialogue creation is wrapped in
//! [`ProxyError::SessionCreation`] so callers can treat it as fatal to that
//! single attempt only.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by the proxy core
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Queue transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to create dialogue for application '{application}': {reason}")]
    SessionCreation { application: String, reason: String },

    #[error("Dialogue {0} is closed")]
    DialogueClosed(String),

    #[error("Dialogue '{0}' not found")]
    DialogueNotFound(String),

    #[error("ARI request failed: {0}")]
    Rest(String),

    #[error("ARI event stream error: {0}")]
    EventStream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Application '{0}' already exists")]
    ApplicationExists(String),

    #[error("Application '{0}' not found")]
    ApplicationNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Dialogue creation failure for `application`
    pub fn session_creation(application: &str, reason: impl std::fmt::Display) -> Self {
        Self::SessionCreation {
            application: application.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Invalid or unreadable configuration
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Rest(err.to_string())
    }
}

/// Result type for proxy core operations
pub type Result<T> = std::result::Result<T, ProxyError>;
