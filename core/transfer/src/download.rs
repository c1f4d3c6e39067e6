//! Download orchestration.

use std::path::Path;
use tracing::debug;

use stagexfer_common::{EncryptionMetadata, Error, Result, TransferStatus};
use stagexfer_crypto::EncryptionMaterial;
use stagexfer_storage::{DownloadTarget, StorageClient, TransferContext};

use crate::engine::{take_error, TransferEngine};

impl TransferEngine {
    /// Download one file into the context's local location or stream.
    ///
    /// Unlike uploads, a failed download attempt is not retried: the first
    /// outcome other than `Downloaded` ends the call with its error.
    ///
    /// # Postconditions
    /// - On `Ok`, `ctx.status` is `Downloaded` and `ctx.dst_file_size` is the
    ///   plaintext size
    ///
    /// # Errors
    /// - Probe or download failure
    /// - Encrypted download without an envelope
    /// - Decryption or filesystem failure
    pub async fn download_one_file(&self, client: &dyn StorageClient, ctx: &mut TransferContext) -> Result<()> {
        if ctx.local_location.is_relative() {
            ctx.local_location = std::env::current_dir()?.join(&ctx.local_location);
        }
        if !ctx.is_stream() {
            tokio::fs::create_dir_all(&ctx.local_location).await?;
        }
        let dest = ctx.destination();
        let name = ctx.src_file_name.clone();

        let outcome = client.get_file_header(ctx, &name).await?;
        let failed = outcome.error.is_some();
        let mut header = ctx.record(outcome);
        if failed {
            let status = ctx.status;
            return Err(take_error(ctx, || format!("probing {} ended with status {}", name, status)));
        }
        if let Some(header) = &header {
            ctx.src_file_size = header.content_length;
        }

        let concurrency = ctx.effective_concurrency();
        for attempt in 0..self.config.retry.max_retries {
            let outcome = client.native_download_file(ctx, &dest, concurrency).await?;
            let failed = outcome.error.is_some();
            ctx.record(outcome);

            if ctx.status == TransferStatus::Downloaded {
                if let Some(material) = ctx.encryption_material.clone() {
                    if ctx.presigned_url.is_some() {
                        let outcome = client.get_file_header(ctx, &name).await?;
                        header = ctx.record(outcome);
                    }
                    let meta = header
                        .take()
                        .and_then(|h| h.encryption_metadata)
                        .ok_or_else(|| Error::Protocol(format!("{} is missing its encryption envelope", name)))?;
                    self.decrypt_download(ctx, meta, material, &dest).await?;
                }
                if !ctx.is_stream() {
                    ctx.dst_file_size = tokio::fs::metadata(&dest).await?.len();
                } else if ctx.encryption_material.is_none() {
                    ctx.dst_file_size = ctx.stream_body().map_or(0, |b| b.len() as u64);
                }
                return Ok(());
            }

            if failed {
                let status = ctx.status;
                return Err(take_error(ctx, || format!("downloading {} ended with status {}", name, status)));
            }
            debug!("Download attempt {} for {} ended with {}", attempt + 1, name, ctx.status);
        }

        Err(take_error(ctx, || format!("unknown error downloading {}", dest.display())))
    }

    /// Replace the downloaded ciphertext with its plaintext.
    async fn decrypt_download(
        &self,
        ctx: &mut TransferContext,
        meta: EncryptionMetadata,
        material: EncryptionMaterial,
        dest: &Path,
    ) -> Result<()> {
        let cipher = self.cipher();

        if let DownloadTarget::Stream(body) = &mut ctx.target {
            let ciphertext = std::mem::take(body);
            let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt_bytes(&meta, &material, &ciphertext))
                .await
                .map_err(|e| Error::Crypto(format!("decryption task failed: {}", e)))??;
            ctx.dst_file_size = plaintext.len() as u64;
            ctx.target = DownloadTarget::Stream(plaintext);
            return Ok(());
        }

        // Decrypt next to the destination so the rename stays on one filesystem.
        let src = dest.to_path_buf();
        let dir = dest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.tmp_dir.clone());
        let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt_file(&meta, &material, &src, &dir))
            .await
            .map_err(|e| Error::Crypto(format!("decryption task failed: {}", e)))??;
        tokio::fs::rename(&plaintext, dest).await?;
        Ok(())
    }
}
