//! Result status of a single provider call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status recorded on a transfer context after every provider call.
///
/// The orchestrator reads the status to pick its next move; it is replaced,
/// never accumulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// No provider call has completed yet.
    #[default]
    Pending,
    Uploaded,
    Downloaded,
    /// Upload not needed, the object is already present.
    Skipped,
    NotFound,
    /// Transient failure, retry at the same concurrency.
    NeedsRetry,
    /// Transient failure, retry with fewer concurrent parts.
    NeedsRetryLowerConcurrency,
    /// Bearer token expired; the caller must refresh credentials.
    RenewToken,
    /// Presigned URL expired; the caller must request a new one.
    RenewPresignedUrl,
    /// Fatal failure.
    Error,
}

impl TransferStatus {
    /// Whether the status asks for another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::NeedsRetry | Self::NeedsRetryLowerConcurrency)
    }

    /// Whether the status asks the caller to refresh credentials.
    pub fn needs_renewal(self) -> bool {
        matches!(self, Self::RenewToken | Self::RenewPresignedUrl)
    }

    /// Whether the status marks a completed transfer of the object.
    pub fn is_transferred(self) -> bool {
        matches!(self, Self::Uploaded | Self::Downloaded)
    }

    /// Stable string form used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Uploaded => "UPLOADED",
            Self::Downloaded => "DOWNLOADED",
            Self::Skipped => "SKIPPED",
            Self::NotFound => "NOT_FOUND_FILE",
            Self::NeedsRetry => "NEED_RETRY",
            Self::NeedsRetryLowerConcurrency => "NEED_RETRY_WITH_LOWER_CONCURRENCY",
            Self::RenewToken => "RENEW_TOKEN",
            Self::RenewPresignedUrl => "RENEW_PRESIGNED_URL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
