//! Storage client trait definition.

use async_trait::async_trait;
use std::path::Path;

use stagexfer_common::{ClientHandle, Error, FileHeader, Result, StageLocation, TransferStatus};

use crate::context::TransferContext;

/// Result of one provider primitive.
///
/// Every HTTP answer a provider can classify becomes an `Outcome`; only
/// transport, cancellation, filesystem and decode failures surface as `Err`.
#[derive(Debug)]
pub struct Outcome {
    /// Status to record on the context.
    pub status: TransferStatus,
    /// Error explaining a non-success status.
    pub error: Option<Error>,
    /// Header learned from the call, if any.
    pub header: Option<FileHeader>,
    /// Bytes moved over the wire.
    pub transferred: Option<u64>,
    /// Downloaded body when the context targets an in-memory stream.
    pub body: Option<Vec<u8>>,
}

impl Outcome {
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status,
            error: None,
            header: None,
            transferred: None,
            body: None,
        }
    }

    pub fn failed(status: TransferStatus, error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::status(status)
        }
    }

    pub fn with_header(mut self, header: FileHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_transferred(mut self, bytes: u64) -> Self {
        self.transferred = Some(bytes);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Protocol client for one storage backend.
///
/// Implementations own the full translation from their native error
/// vocabulary to [`TransferStatus`]. They must not retry beyond what their
/// protocol requires; retry policy belongs to the orchestrator.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Provider name (e.g. "gcs", "local").
    fn name(&self) -> &str;

    /// Build the session handle used by the other primitives.
    ///
    /// Performs no network I/O.
    fn create_client(&self, stage: &StageLocation, use_accelerate: bool) -> Result<ClientHandle>;

    /// Probe the remote object `file_name`.
    ///
    /// Returns the cached header without a round-trip when the context just
    /// completed an upload or download. A missing object is
    /// `TransferStatus::NotFound` without an error.
    async fn get_file_header(&self, ctx: &TransferContext, file_name: &str) -> Result<Outcome>;

    /// Upload the context's source to its destination name.
    async fn upload_file(
        &self,
        ctx: &TransferContext,
        max_concurrency: usize,
        multipart_threshold: u64,
    ) -> Result<Outcome>;

    /// Download the context's source object.
    ///
    /// Writes to `dest` unless the context targets an in-memory stream, in
    /// which case the body is returned in the outcome.
    async fn native_download_file(
        &self,
        ctx: &TransferContext,
        dest: &Path,
        max_concurrency: usize,
    ) -> Result<Outcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builders() {
        let outcome = Outcome::failed(TransferStatus::NeedsRetry, Error::http(503, "Service Unavailable"))
            .with_transferred(10);
        assert_eq!(outcome.status, TransferStatus::NeedsRetry);
        assert_eq!(outcome.error.as_ref().and_then(Error::http_status), Some(503));
        assert_eq!(outcome.transferred, Some(10));
        assert!(outcome.header.is_none());
        assert!(outcome.body.is_none());
    }
}
