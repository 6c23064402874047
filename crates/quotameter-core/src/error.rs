//! Unified error handling for quotameter-core

use thiserror::Error;

/// Core error type for quotameter-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt cache: {0}")]
    CorruptCache(String),
}

/// Result type alias for quotameter-core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a corrupt cache error
    pub fn corrupt_cache(msg: impl Into<String>) -> Self {
        Error::CorruptCache(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::validation("yellow must be greater than green");
        assert_eq!(
            err.to_string(),
            "Validation error: yellow must be greater than green"
        );
    }

    #[test]
    fn test_corrupt_cache_display() {
        let err = Error::corrupt_cache("unexpected EOF");
        assert_eq!(err.to_string(), "Corrupt cache: unexpected EOF");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }
}
