//! Per-file transfer state.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stagexfer_common::{ClientHandle, EncryptionMetadata, Error, FileHeader, StageLocation, TransferStatus};
use stagexfer_crypto::EncryptionMaterial;

use crate::client::Outcome;

/// Which way the file is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Where upload bytes come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File(PathBuf),
    Bytes(Bytes),
}

/// Where download bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// A file under the context's local location.
    File,
    /// An in-memory buffer; holds the body once the download completes.
    Stream(Vec<u8>),
}

/// State of one file's transfer.
///
/// Owned by exactly one orchestration call. Primitives read it; the
/// orchestrator applies their [`Outcome`]s through [`TransferContext::record`].
#[derive(Debug)]
pub struct TransferContext {
    pub direction: Direction,
    /// Remote name read on download.
    pub src_file_name: String,
    /// Remote name written on upload.
    pub dst_file_name: String,
    pub source: Option<UploadSource>,
    pub target: DownloadTarget,
    /// Local directory downloads land in.
    pub local_location: PathBuf,
    /// Scratch directory for ciphertext and plaintext temporaries.
    pub tmp_dir: PathBuf,
    pub src_file_size: u64,
    pub dst_file_size: u64,
    /// Compression applied to the uploaded bytes (e.g. "GZIP", "ZSTD").
    pub compression: Option<String>,
    /// Declared parallelism for this file.
    pub parallel: usize,
    /// Concurrency the last degraded retry settled on.
    pub last_max_concurrency: Option<usize>,
    pub overwrite: bool,
    /// Base64 SHA-256 of the uploaded bytes.
    pub sha256_digest: String,
    pub encryption_material: Option<EncryptionMaterial>,
    /// Envelope published with an encrypted upload.
    pub encrypt_meta: Option<EncryptionMetadata>,
    /// Presigned URL; when set, bearer auth is not used.
    pub presigned_url: Option<String>,
    pub stage: Arc<StageLocation>,
    pub client: Option<ClientHandle>,
    pub status: TransferStatus,
    pub last_error: Option<Error>,
    /// Header from the last completed upload or download.
    pub header: Option<FileHeader>,
    pub cancel: CancellationToken,
}

impl TransferContext {
    fn base(direction: Direction, stage: Arc<StageLocation>) -> Self {
        let presigned_url = stage.presigned_url.clone().filter(|url| !url.is_empty());
        Self {
            direction,
            src_file_name: String::new(),
            dst_file_name: String::new(),
            source: None,
            target: DownloadTarget::File,
            local_location: PathBuf::new(),
            tmp_dir: std::env::temp_dir(),
            src_file_size: 0,
            dst_file_size: 0,
            compression: None,
            parallel: 1,
            last_max_concurrency: None,
            overwrite: false,
            sha256_digest: String::new(),
            encryption_material: None,
            encrypt_meta: None,
            presigned_url,
            stage,
            client: None,
            status: TransferStatus::Pending,
            last_error: None,
            header: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for uploading `source` as `dst_file_name`.
    pub fn upload(stage: Arc<StageLocation>, source: UploadSource, dst_file_name: impl Into<String>) -> Self {
        let dst_file_name = dst_file_name.into();
        let mut ctx = Self::base(Direction::Upload, stage);
        ctx.src_file_size = match &source {
            UploadSource::Bytes(bytes) => bytes.len() as u64,
            UploadSource::File(_) => 0,
        };
        ctx.src_file_name = dst_file_name.clone();
        ctx.dst_file_name = dst_file_name;
        ctx.source = Some(source);
        ctx
    }

    /// Context for downloading `src_file_name` into `local_location`.
    pub fn download(
        stage: Arc<StageLocation>,
        src_file_name: impl Into<String>,
        local_location: impl Into<PathBuf>,
    ) -> Self {
        let src_file_name = src_file_name.into();
        let mut ctx = Self::base(Direction::Download, stage);
        ctx.dst_file_name = src_file_name.clone();
        ctx.src_file_name = src_file_name;
        ctx.local_location = local_location.into();
        ctx
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.sha256_digest = digest.into();
        self
    }

    pub fn with_encryption(mut self, material: EncryptionMaterial) -> Self {
        self.encryption_material = Some(material);
        self
    }

    pub fn with_envelope(mut self, meta: EncryptionMetadata) -> Self {
        self.encrypt_meta = Some(meta);
        self
    }

    pub fn with_presigned_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.presigned_url = (!url.is_empty()).then_some(url);
        self
    }

    pub fn with_client(mut self, client: ClientHandle) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download into memory instead of a file.
    pub fn into_stream(mut self) -> Self {
        self.target = DownloadTarget::Stream(Vec::new());
        self
    }

    /// The client handle, or an error when none has been created.
    pub fn client_handle(&self) -> stagexfer_common::Result<&ClientHandle> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("transfer context has no client handle".to_string()))
    }

    /// Cached header, only while it describes the just-completed transfer.
    pub fn cached_header(&self) -> Option<&FileHeader> {
        if self.status.is_transferred() {
            self.header.as_ref()
        } else {
            None
        }
    }

    /// Status a successful probe reports for this direction.
    pub fn present_status(&self) -> TransferStatus {
        match self.direction {
            Direction::Upload => TransferStatus::Uploaded,
            Direction::Download => TransferStatus::Downloaded,
        }
    }

    /// Concurrency to use for the next attempt.
    pub fn effective_concurrency(&self) -> usize {
        self.last_max_concurrency.unwrap_or(self.parallel).max(1)
    }

    /// Buffer of an in-memory download.
    pub fn stream_body(&self) -> Option<&[u8]> {
        match &self.target {
            DownloadTarget::Stream(body) => Some(body),
            DownloadTarget::File => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.target, DownloadTarget::Stream(_))
    }

    /// Local path a file download lands at.
    pub fn destination(&self) -> PathBuf {
        let base = Path::new(&self.src_file_name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.src_file_name));
        self.local_location.join(base)
    }

    /// Apply a primitive's outcome and return the header it carried.
    ///
    /// The status is replaced; an error, when present, replaces the last
    /// error. Headers of transferred objects are cached for later probes.
    pub fn record(&mut self, outcome: Outcome) -> Option<FileHeader> {
        self.status = outcome.status;
        if let Some(err) = outcome.error {
            self.last_error = Some(err);
        }
        if let Some(bytes) = outcome.transferred {
            match self.direction {
                Direction::Upload => self.dst_file_size = bytes,
                Direction::Download => self.src_file_size = bytes,
            }
        }
        if let (Some(body), DownloadTarget::Stream(buf)) = (outcome.body, &mut self.target) {
            *buf = body;
        }
        if outcome.status.is_transferred() {
            if let Some(header) = &outcome.header {
                self.header = Some(header.clone());
            }
        }
        outcome.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> Arc<StageLocation> {
        Arc::new(StageLocation::new("GCS", "bucket/prefix"))
    }

    #[test]
    fn test_upload_context_defaults() {
        let ctx = TransferContext::upload(stage(), UploadSource::Bytes(Bytes::from_static(b"abc")), "a.csv");
        assert_eq!(ctx.direction, Direction::Upload);
        assert_eq!(ctx.dst_file_name, "a.csv");
        assert_eq!(ctx.src_file_size, 3);
        assert_eq!(ctx.status, TransferStatus::Pending);
        assert_eq!(ctx.effective_concurrency(), 1);
        assert!(ctx.client_handle().is_err());
        assert!(ctx.presigned_url.is_none());
    }

    #[test]
    fn test_presigned_url_from_stage() {
        let mut location = StageLocation::new("GCS", "bucket");
        location.presigned_url = Some("https://signed.example/obj?sig=1".to_string());
        let ctx = TransferContext::download(Arc::new(location), "obj", "/tmp/out");
        assert_eq!(ctx.presigned_url.as_deref(), Some("https://signed.example/obj?sig=1"));

        let cleared = ctx.with_presigned_url("");
        assert!(cleared.presigned_url.is_none());
    }

    #[test]
    fn test_destination_uses_basename() {
        let ctx = TransferContext::download(stage(), "nested/dir/data.csv.gz", "/tmp/out");
        assert_eq!(ctx.destination(), PathBuf::from("/tmp/out/data.csv.gz"));
    }

    #[test]
    fn test_record_caches_transferred_header() {
        let mut ctx = TransferContext::upload(stage(), UploadSource::Bytes(Bytes::new()), "a");
        let header = FileHeader {
            digest: Some("d".to_string()),
            content_length: 9,
            encryption_metadata: None,
        };

        ctx.record(Outcome::status(TransferStatus::Uploaded).with_header(header.clone()).with_transferred(9));
        assert_eq!(ctx.dst_file_size, 9);
        assert_eq!(ctx.cached_header(), Some(&header));

        ctx.record(Outcome::failed(TransferStatus::NeedsRetry, Error::http(503, "Service Unavailable")));
        assert!(ctx.cached_header().is_none());
        assert_eq!(ctx.last_error.as_ref().and_then(Error::http_status), Some(503));
    }

    #[test]
    fn test_record_keeps_last_error_on_success() {
        let mut ctx = TransferContext::download(stage(), "a", "/tmp").into_stream();
        ctx.record(Outcome::failed(TransferStatus::NeedsRetry, Error::Timeout("GET".to_string())));
        ctx.record(
            Outcome::status(TransferStatus::Downloaded)
                .with_body(b"payload".to_vec())
                .with_transferred(7),
        );
        assert_eq!(ctx.stream_body(), Some(&b"payload"[..]));
        assert_eq!(ctx.src_file_size, 7);
        assert!(matches!(ctx.last_error, Some(Error::Timeout(_))));
    }
}
