//! Transfer engine: client selection and per-file preparation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use stagexfer_common::{Error, Result};
use stagexfer_crypto::{AeadEnvelopeCipher, EnvelopeCipher};
use stagexfer_storage::{
    sha256_digest_bytes, sha256_digest_file, ClientSelector, StorageClient, TransferContext,
    UploadSource,
};

use crate::config::TransferConfig;

/// Drives single-file uploads and downloads against stage storage.
///
/// The engine owns no per-file state: every call works on the
/// [`TransferContext`] it is handed.
pub struct TransferEngine {
    selector: ClientSelector,
    cipher: Arc<dyn EnvelopeCipher>,
    pub(crate) config: TransferConfig,
}

impl TransferEngine {
    /// Create an engine with the built-in clients.
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(config: TransferConfig) -> Result<Self> {
        let selector = ClientSelector::new(&config.http)?;
        Ok(Self::with_selector(config, selector))
    }

    /// Create an engine over a caller-supplied selector.
    pub fn with_selector(config: TransferConfig, selector: ClientSelector) -> Self {
        Self {
            selector,
            cipher: Arc::new(AeadEnvelopeCipher::new()),
            config,
        }
    }

    /// Replace the envelope cipher.
    pub fn with_cipher(mut self, cipher: Arc<dyn EnvelopeCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Select the client for the context's stage and make sure the context
    /// carries a handle for it.
    pub fn prepare(&self, ctx: &mut TransferContext) -> Result<Arc<dyn StorageClient>> {
        let client = self.selector.select_for(&ctx.stage)?;
        if ctx.client.is_none() {
            ctx.client = Some(client.create_client(&ctx.stage, self.config.use_accelerate)?);
        }
        Ok(client)
    }

    /// Upload one file: digest, encrypt when the context carries material,
    /// upload with retries, then verify the object is visible.
    ///
    /// Outcome is reported through `ctx.status`; `Err` is fatal.
    pub async fn put(&self, ctx: &mut TransferContext) -> Result<()> {
        let client = self.prepare(ctx)?;
        let original_source = ctx.source.clone();
        let original_meta = ctx.encrypt_meta.clone();
        let staged = self.seal_source(ctx).await?;

        let result = self.upload_one_file_with_retry(client.as_ref(), ctx).await;

        // The envelope belongs to the staged ciphertext; a later put re-seals.
        ctx.source = original_source;
        ctx.encrypt_meta = original_meta;
        for path in staged {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Failed to remove staged file {}: {}", path.display(), e);
            }
        }

        match &result {
            Ok(()) => info!(
                "PUT {} finished with status {} ({} bytes)",
                ctx.dst_file_name, ctx.status, ctx.dst_file_size
            ),
            Err(e) => info!("PUT {} failed: {}", ctx.dst_file_name, e),
        }
        result
    }

    /// Download one file, decrypting it when the context carries material.
    pub async fn get(&self, ctx: &mut TransferContext) -> Result<()> {
        let client = self.prepare(ctx)?;
        let result = self.download_one_file(client.as_ref(), ctx).await;
        match &result {
            Ok(()) => info!(
                "GET {} finished with status {} ({} bytes)",
                ctx.src_file_name, ctx.status, ctx.dst_file_size
            ),
            Err(e) => info!("GET {} failed: {}", ctx.src_file_name, e),
        }
        result
    }

    /// Fill in the digest and, with encryption material, swap the source for
    /// its ciphertext. Returns temporaries to delete once the upload ends.
    async fn seal_source(&self, ctx: &mut TransferContext) -> Result<Vec<PathBuf>> {
        let source = ctx
            .source
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("no upload source for {}", ctx.dst_file_name)))?;

        if let UploadSource::File(path) = &source {
            ctx.src_file_size = tokio::fs::metadata(path).await?.len();
        }
        if ctx.sha256_digest.is_empty() {
            ctx.sha256_digest = match &source {
                UploadSource::File(path) => sha256_digest_file(path).await?,
                UploadSource::Bytes(bytes) => sha256_digest_bytes(bytes),
            };
        }

        let Some(material) = ctx.encryption_material.clone() else {
            return Ok(Vec::new());
        };
        if ctx.encrypt_meta.is_some() {
            return Ok(Vec::new());
        }

        let mut staged = Vec::new();
        let plaintext = match source {
            UploadSource::File(path) => path,
            UploadSource::Bytes(bytes) => {
                let path = ctx.tmp_dir.join(format!("{}.{}.plain", ctx.dst_file_name.replace('/', "_"), Uuid::new_v4()));
                tokio::fs::write(&path, &bytes).await?;
                staged.push(path.clone());
                path
            }
        };

        let cipher = Arc::clone(&self.cipher);
        let tmp_dir = ctx.tmp_dir.clone();
        let sealed = tokio::task::spawn_blocking(move || cipher.encrypt_file(&material, &plaintext, &tmp_dir))
            .await
            .map_err(|e| Error::Crypto(format!("encryption task failed: {}", e)))?;
        let (meta, ciphertext) = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                for path in &staged {
                    let _ = tokio::fs::remove_file(path).await;
                }
                return Err(e);
            }
        };

        debug!("Encrypted {} into {}", ctx.dst_file_name, ciphertext.display());
        staged.push(ciphertext.clone());
        ctx.encrypt_meta = Some(meta);
        ctx.source = Some(UploadSource::File(ciphertext));
        Ok(staged)
    }

    /// Sleep for `delay` unless the context is cancelled first.
    pub(crate) async fn pause(&self, ctx: &TransferContext, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    pub(crate) fn cipher(&self) -> Arc<dyn EnvelopeCipher> {
        Arc::clone(&self.cipher)
    }
}

/// Error to hand back for a context that ended in `what`.
pub(crate) fn take_error(ctx: &mut TransferContext, what: impl FnOnce() -> String) -> Error {
    ctx.last_error.take().unwrap_or_else(|| Error::Exhausted(what()))
}
