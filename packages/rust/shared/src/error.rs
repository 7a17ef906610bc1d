//! Error types for cardsync.
//!
//! Library crates use [`CardSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all cardsync operations.
#[derive(Debug, thiserror::Error)]
pub enum CardSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// vCard or webhook payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Entity store failure during read or write. Never retried locally.
    #[error("storage error: {0}")]
    Storage(String),

    /// A required lookup found nothing.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A lookup that must be unique found more than one candidate.
    #[error("ambiguous match: {count} candidates found for '{term}'")]
    AmbiguousMatch { count: usize, term: String },

    /// Webhook caller or email sender failed authorization.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Data validation error (unknown attribute, blank required input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CardSyncError>;

impl CardSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a not-found error from any displayable message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create an ambiguous-match error naming the candidate count and search term.
    pub fn ambiguous(count: usize, term: impl Into<String>) -> Self {
        Self::AmbiguousMatch {
            count,
            term: term.into(),
        }
    }

    /// Create an authorization error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from a lookup that needs data entry
    /// (as opposed to manual disambiguation or an outage).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
