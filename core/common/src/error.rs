//! Common error types for stagexfer.

use thiserror::Error;

/// Top-level error type for transfer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage service answered with a non-success HTTP status.
    #[error("HTTP {status}: {reason}")]
    Http {
        /// Numeric status code.
        status: u16,
        /// Canonical reason phrase or response text.
        reason: String,
    },

    /// Transport-level failure (connection reset, DNS, TLS, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// A request did not finish within its timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the transfer.
    #[error("Transfer cancelled")]
    Cancelled,

    /// The remote side sent something we could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The stage declares a location type no client is available for.
    #[error("Unsupported stage location type: {0}")]
    UnsupportedLocation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retry budget consumed without ever recording a specific error.
    #[error("{0}")]
    Exhausted(String),
}

impl Error {
    /// Build an [`Error::Http`] from a status code and its reason phrase.
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        Self::Http {
            status,
            reason: reason.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = Error::http(403, "Forbidden");
        assert_eq!(err.to_string(), "HTTP 403: Forbidden");
        assert_eq!(err.http_status(), Some(403));
    }

    #[test]
    fn test_exhausted_message_is_verbatim() {
        let err = Error::Exhausted("unknown error uploading data.csv".to_string());
        assert_eq!(err.to_string(), "unknown error uploading data.csv");
        assert_eq!(err.http_status(), None);
    }
}
