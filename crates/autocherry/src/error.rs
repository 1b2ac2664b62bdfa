//! Error types shared across the service.

use thiserror::Error;

/// Errors returned by the GitHub capability interface.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with a non-success status
    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// App or installation authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl GitHubError {
    /// Whether GitHub reported the resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Classified failure of a cherry-pick attempt.
#[derive(Debug, Error)]
pub enum PickError {
    /// The commit is already present on the target, or the resulting diff is empty.
    #[error("noop cherry-pick")]
    NoOp,

    /// Conflict or any other git failure. The message is already redacted.
    #[error("{0}")]
    Failed(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors raised while unwrapping a queue message.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("empty message body")]
    Empty,

    #[error("unknown event")]
    UnknownEvent,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
