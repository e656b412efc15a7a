//! Error types for the viewer engine

use crate::config::ConfigError;

/// Result type alias for viewer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Registration failures, reported to the caller as HTTP 400
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Webhook URL is not an absolute http(s) URL with a host
    #[error("Provide absolute http(s) URL (got {0:?})")]
    InvalidWebhookUrl(String),
}

/// Errors that can occur in the viewer engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid `viewers` configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Subscriber registration refused
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Program guide failure
    #[error("Program guide error: {0}")]
    Guide(#[from] tvguide::Error),

    /// JSON serialization failed
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (from tvconfig/anyhow)
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
