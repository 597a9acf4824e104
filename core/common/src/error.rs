//! Common error types for repsync.

use thiserror::Error;

/// Top-level error type for repsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Durable store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The remote endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote endpoint answered with a non-success status.
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Cache substrate operation failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure is likely to clear up on its own.
    ///
    /// Network failures and 5xx/408/429 rejections are transient; any other
    /// rejection is a permanent refusal of the payload.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Io(_) => true,
            Error::Rejected { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("offline".to_string()).is_transient());
        assert!(Error::Rejected { status: 503, message: String::new() }.is_transient());
        assert!(Error::Rejected { status: 429, message: String::new() }.is_transient());
        assert!(!Error::Rejected { status: 422, message: String::new() }.is_transient());
        assert!(!Error::Storage("disk full".to_string()).is_transient());
    }

    #[test]
    fn test_rejected_display() {
        let err = Error::Rejected {
            status: 409,
            message: "duplicate set".to_string(),
        };
        assert_eq!(err.to_string(), "Rejected with status 409: duplicate set");
    }
}
