//! Error types for blobserver
//!
//! Both error enums are `Clone` so that the outcome of a single resolution
//! can be handed to every caller waiting on it.

use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a durable store backend
#[derive(Error, Debug, Clone)]
pub enum DurableError {
    /// The object does not exist; callers fall through to the next tier
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Transport, permission or protocol failure talking to the store
    #[error("Durable store unavailable: {0}")]
    Unavailable(String),

    /// Local IO failure while moving bytes to or from the store
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl DurableError {
    /// Whether this error means "object does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, DurableError::NotFound(_))
    }
}

impl From<std::io::Error> for DurableError {
    fn from(err: std::io::Error) -> Self {
        DurableError::Io(Arc::new(err))
    }
}

/// Main error type for blobserver
#[derive(Error, Debug, Clone)]
pub enum BlobError {
    /// Identifier cannot be used as a blob name
    #[error("Invalid blob id: {0}")]
    InvalidId(String),

    /// No origin is registered for the identifier
    #[error("Blob not known: {0}")]
    UnknownBlob(String),

    /// Durable store failure other than a miss
    #[error("Durable store error: {0}")]
    Durable(#[from] DurableError),

    /// Origin fetch failed after all attempts
    #[error("Origin fetch from {url} failed: {message}")]
    Origin { url: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for blobserver operations
pub type BlobResult<T> = Result<T, BlobError>;

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Io(Arc::new(err))
    }
}

impl From<toml::de::Error> for BlobError {
    fn from(err: toml::de::Error) -> Self {
        BlobError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(err: serde_json::Error) -> Self {
        BlobError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BlobError::UnknownBlob("abc123".to_string());
        assert_eq!(err.to_string(), "Blob not known: abc123");

        let err = BlobError::Origin {
            url: "https://example.com/a".to_string(),
            message: "unexpected status 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Origin fetch from https://example.com/a failed: unexpected status 503"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BlobError = io_err.into();
        assert!(matches!(err, BlobError::Io(_)));
    }

    #[test]
    fn test_durable_not_found_is_distinguishable() {
        let miss = DurableError::NotFound("gs://bucket/abc".to_string());
        let outage = DurableError::Unavailable("connection reset".to_string());
        assert!(miss.is_not_found());
        assert!(!outage.is_not_found());

        let err: BlobError = outage.into();
        assert!(matches!(err, BlobError::Durable(DurableError::Unavailable(_))));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err: BlobError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
