//! Error types for notes synchronization
//!
//! `NotesError` is the error returned by fallible operations across the crate.
//! Cache entries cannot hold a `NotesError` directly (it is not `Clone`), so a
//! failed fetch is recorded as the lighter [`ErrorKind`] instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for notes operations
#[derive(Error, Debug)]
pub enum NotesError {
    /// Read or write failed to reach the backend (transient)
    #[error("Network error: {0}")]
    Network(String),

    /// Payload rejected before or at the write boundary
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend answered with a shape that does not fit a notes page
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A create is already pending for this form
    #[error("A submission is already in flight")]
    SubmissionInFlight,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for notes operations
pub type Result<T> = std::result::Result<T, NotesError>;

impl From<String> for NotesError {
    fn from(s: String) -> Self {
        NotesError::Other(s)
    }
}

impl From<&str> for NotesError {
    fn from(s: &str) -> Self {
        NotesError::Other(s.to_string())
    }
}

/// Classified failure stored on a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ErrorKind {
    Network(String),
    Validation(String),
    InvalidPayload(String),
    Other(String),
}

impl ErrorKind {
    /// Reduce a fetch failure to the kind recorded on the entry
    pub fn classify(cause: &NotesError) -> Self {
        match cause {
            NotesError::Network(msg) => ErrorKind::Network(msg.clone()),
            NotesError::Validation(msg) => ErrorKind::Validation(msg.clone()),
            NotesError::InvalidPayload(msg) => ErrorKind::InvalidPayload(msg.clone()),
            NotesError::Serialization(e) => ErrorKind::InvalidPayload(e.to_string()),
            other => ErrorKind::Other(other.to_string()),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ErrorKind::Network(msg)
            | ErrorKind::Validation(msg)
            | ErrorKind::InvalidPayload(msg)
            | ErrorKind::Other(msg) => msg,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Network(msg) => write!(f, "network: {}", msg),
            ErrorKind::Validation(msg) => write!(f, "validation: {}", msg),
            ErrorKind::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
            ErrorKind::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = NotesError::Network("connection reset".to_string());
        assert_eq!(error.to_string(), "Network error: connection reset");

        let error = NotesError::SubmissionInFlight;
        assert!(error.to_string().contains("already in flight"));
    }

    #[test]
    fn test_error_conversion() {
        let error: NotesError = "test error".into();
        assert!(matches!(error, NotesError::Other(_)));

        let error: NotesError = "test error".to_string().into();
        assert!(matches!(error, NotesError::Other(_)));
    }

    #[test]
    fn test_classify() {
        let kind = ErrorKind::classify(&NotesError::Network("timeout".to_string()));
        assert_eq!(kind, ErrorKind::Network("timeout".to_string()));
        assert!(kind.is_transient());

        let kind = ErrorKind::classify(&NotesError::Validation("title".to_string()));
        assert!(!kind.is_transient());
        assert_eq!(kind.message(), "title");

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let kind = ErrorKind::classify(&NotesError::Serialization(bad_json));
        assert!(matches!(kind, ErrorKind::InvalidPayload(_)));

        let kind = ErrorKind::classify(&NotesError::SubmissionInFlight);
        assert!(matches!(kind, ErrorKind::Other(_)));
    }
}
