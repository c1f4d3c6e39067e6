//! Local filesystem stage client.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use stagexfer_common::{
    ClientHandle, EncryptionMetadata, Error, FileHeader, Result, StageLocation, TransferStatus,
};

use crate::client::{Outcome, StorageClient};
use crate::context::{DownloadTarget, TransferContext, UploadSource};
use crate::digest::sha256_digest_file;
use crate::http::cancellable;

/// Suffix of the file holding an object's envelope.
pub const ENVELOPE_SUFFIX: &str = ".envelope.json";

/// Stage client for `LOCAL_FS` locations.
///
/// The stage location is a directory; each object is a plain file in it.
/// Envelopes of encrypted objects sit next to them in a sidecar file.
#[derive(Debug, Default, Clone)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        Self
    }

    /// Filesystem path of `file_name` in the stage directory.
    fn object_path(stage: &StageLocation, file_name: &str) -> PathBuf {
        Path::new(&stage.location).join(file_name.trim_start_matches('/'))
    }

    fn envelope_path(object: &Path) -> PathBuf {
        let mut name = object.as_os_str().to_owned();
        name.push(ENVELOPE_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_envelope(object: &Path) -> Result<Option<EncryptionMetadata>> {
        match fs::read(Self::envelope_path(object)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| Error::Protocol(format!("Malformed envelope for {}: {}", object.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_envelope(object: &Path, meta: Option<&EncryptionMetadata>) -> Result<()> {
        let sidecar = Self::envelope_path(object);
        match meta {
            Some(meta) => fs::write(&sidecar, serde_json::to_vec(meta)?).await?,
            None => match fs::remove_file(&sidecar).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    async fn header_of(object: &Path, len: u64) -> Result<FileHeader> {
        Ok(FileHeader {
            digest: Some(sha256_digest_file(object).await?),
            content_length: len,
            encryption_metadata: Self::read_envelope(object).await?,
        })
    }
}

#[async_trait]
impl StorageClient for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    fn create_client(&self, stage: &StageLocation, _use_accelerate: bool) -> Result<ClientHandle> {
        debug!("Local stage at {}", stage.location);
        Ok(ClientHandle::Unauthenticated)
    }

    async fn get_file_header(&self, ctx: &TransferContext, file_name: &str) -> Result<Outcome> {
        if let Some(header) = ctx.cached_header() {
            return Ok(Outcome::status(ctx.status).with_header(header.clone()));
        }

        let object = Self::object_path(&ctx.stage, file_name);
        let metadata = match fs::metadata(&object).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(Outcome::status(TransferStatus::NotFound)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::status(TransferStatus::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        let header = Self::header_of(&object, metadata.len()).await?;
        Ok(Outcome::status(ctx.present_status()).with_header(header))
    }

    async fn upload_file(
        &self,
        ctx: &TransferContext,
        _max_concurrency: usize,
        _multipart_threshold: u64,
    ) -> Result<Outcome> {
        let object = Self::object_path(&ctx.stage, &ctx.dst_file_name);
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent).await?;
        }

        let source = ctx
            .source
            .as_ref()
            .ok_or_else(|| Error::InvalidInput(format!("no upload source for {}", ctx.dst_file_name)))?;
        let size = cancellable(&ctx.cancel, async {
            match source {
                UploadSource::File(path) => fs::copy(path, &object).await.map_err(Error::from),
                UploadSource::Bytes(bytes) => fs::write(&object, bytes)
                    .await
                    .map(|()| bytes.len() as u64)
                    .map_err(Error::from),
            }
        })
        .await?;
        Self::write_envelope(&object, ctx.encrypt_meta.as_ref()).await?;
        debug!("Copied {} bytes to {}", size, object.display());

        let header = FileHeader {
            digest: Some(ctx.sha256_digest.clone()).filter(|d| !d.is_empty()),
            content_length: size,
            encryption_metadata: ctx.encrypt_meta.clone(),
        };
        Ok(Outcome::status(TransferStatus::Uploaded)
            .with_header(header)
            .with_transferred(size))
    }

    async fn native_download_file(
        &self,
        ctx: &TransferContext,
        dest: &Path,
        _max_concurrency: usize,
    ) -> Result<Outcome> {
        let object = Self::object_path(&ctx.stage, &ctx.src_file_name);
        match fs::metadata(&object).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                return Ok(Outcome::failed(
                    TransferStatus::NotFound,
                    Error::NotFound(format!("{} is not a file", object.display())),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::failed(
                    TransferStatus::NotFound,
                    Error::NotFound(format!("File not found: {}", object.display())),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = match ctx.target {
            DownloadTarget::File => {
                let size = cancellable(&ctx.cancel, async { fs::copy(&object, dest).await.map_err(Error::from) }).await?;
                Outcome::status(TransferStatus::Downloaded).with_transferred(size)
            }
            DownloadTarget::Stream(_) => {
                let body = cancellable(&ctx.cancel, async { fs::read(&object).await.map_err(Error::from) }).await?;
                Outcome::status(TransferStatus::Downloaded)
                    .with_transferred(body.len() as u64)
                    .with_body(body)
            }
        };

        let size = outcome.transferred.unwrap_or_default();
        let header = Self::header_of(&object, size).await?;
        Ok(outcome.with_header(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stage(dir: &TempDir) -> Arc<StageLocation> {
        Arc::new(StageLocation::new("LOCAL_FS", dir.path().to_string_lossy()))
    }

    fn upload_ctx(dir: &TempDir, name: &str, data: &'static [u8]) -> TransferContext {
        TransferContext::upload(stage(dir), UploadSource::Bytes(Bytes::from_static(data)), name)
            .with_client(ClientHandle::Unauthenticated)
    }

    #[test]
    fn test_create_client_is_unauthenticated() {
        let dir = TempDir::new().unwrap();
        let handle = LocalClient::new().create_client(&stage(&dir), true).unwrap();
        assert_eq!(handle, ClientHandle::Unauthenticated);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new();
        let ctx = upload_ctx(&dir, "missing.csv", b"");

        let outcome = client.get_file_header(&ctx, "missing.csv").await.unwrap();
        assert_eq!(outcome.status, TransferStatus::NotFound);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_upload_then_probe() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new();
        let mut ctx = upload_ctx(&dir, "nested/data.csv", b"a,b\n1,2\n");

        let outcome = client.upload_file(&ctx, 1, 0).await.unwrap();
        assert_eq!(outcome.status, TransferStatus::Uploaded);
        assert_eq!(outcome.transferred, Some(8));
        ctx.record(outcome);

        // A fresh probe has to go to disk.
        ctx.status = TransferStatus::Pending;
        let outcome = client.get_file_header(&ctx, "nested/data.csv").await.unwrap();
        assert_eq!(outcome.status, TransferStatus::Uploaded);
        let header = outcome.header.unwrap();
        assert_eq!(header.content_length, 8);
        assert_eq!(header.digest, Some(crate::sha256_digest_bytes(b"a,b\n1,2\n")));
        assert!(header.encryption_metadata.is_none());
    }

    #[tokio::test]
    async fn test_envelope_sidecar_roundtrip() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new();
        let meta = EncryptionMetadata {
            key: "a2V5".to_string(),
            iv: "aXY=".to_string(),
            matdesc: "{}".to_string(),
        };
        let ctx = upload_ctx(&dir, "enc.bin", b"cipher").with_envelope(meta.clone());
        client.upload_file(&ctx, 1, 0).await.unwrap();

        let download = TransferContext::download(stage(&dir), "enc.bin", dir.path()).into_stream();
        let outcome = client
            .native_download_file(&download, Path::new("unused"), 1)
            .await
            .unwrap();
        assert_eq!(outcome.status, TransferStatus::Downloaded);
        assert_eq!(outcome.body.as_deref(), Some(&b"cipher"[..]));
        assert_eq!(outcome.header.unwrap().encryption_metadata, Some(meta));
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found_with_error() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new();
        let ctx = TransferContext::download(stage(&dir), "nope.csv", dir.path());

        let outcome = client
            .native_download_file(&ctx, &dir.path().join("nope.csv"), 1)
            .await
            .unwrap();
        assert_eq!(outcome.status, TransferStatus::NotFound);
        assert!(matches!(outcome.error, Some(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let client = LocalClient::new();
        client
            .upload_file(&upload_ctx(&dir, "rows.csv", b"x\ny\n"), 1, 0)
            .await
            .unwrap();

        let ctx = TransferContext::download(stage(&dir), "rows.csv", out.path());
        let dest = ctx.destination();
        let outcome = client.native_download_file(&ctx, &dest, 1).await.unwrap();
        assert_eq!(outcome.transferred, Some(4));
        assert_eq!(fs::read(dest).await.unwrap(), b"x\ny\n");
    }
}
