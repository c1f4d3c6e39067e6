//! Upload orchestration.

use tracing::{debug, info, warn};

use stagexfer_common::{Result, TransferStatus};
use stagexfer_storage::{StorageClient, TransferContext};

use crate::engine::{take_error, TransferEngine};

impl TransferEngine {
    /// Upload one file with retries.
    ///
    /// Without `overwrite`, the object is probed first and an existing one is
    /// skipped. Transient failures back off `min(2^attempt, cap)` seconds;
    /// requests for lower concurrency also shrink the part count.
    ///
    /// # Postconditions
    /// - `Ok` leaves `ctx.status` at `Uploaded`, `Skipped`, `RenewToken` or
    ///   `RenewPresignedUrl`
    ///
    /// # Errors
    /// - A probe that fails with anything but a transient status
    /// - An upload that ends in `Error`
    /// - All attempts transient; the last recorded error is returned
    pub async fn upload_one_file(&self, client: &dyn StorageClient, ctx: &mut TransferContext) -> Result<()> {
        let policy = &self.config.retry;
        let mut concurrency = ctx.effective_concurrency();

        for attempt in 0..policy.max_retries {
            let mut upload = ctx.overwrite;

            if !ctx.overwrite {
                let name = ctx.dst_file_name.clone();
                let outcome = client.get_file_header(ctx, &name).await?;
                let header = ctx.record(outcome);
                match ctx.status {
                    TransferStatus::NotFound => upload = true,
                    TransferStatus::Uploaded if header.is_some() => {
                        debug!("{} already present, skipping", name);
                        ctx.dst_file_size = 0;
                        ctx.status = TransferStatus::Skipped;
                        return Ok(());
                    }
                    status if status.is_retryable() => {}
                    status => {
                        return Err(take_error(ctx, || format!("probing {} ended with status {}", name, status)));
                    }
                }
            }

            if upload {
                let outcome = client
                    .upload_file(ctx, concurrency, self.config.multipart_threshold)
                    .await?;
                ctx.record(outcome);
            }

            match ctx.status {
                TransferStatus::Uploaded | TransferStatus::RenewToken | TransferStatus::RenewPresignedUrl => {
                    return Ok(());
                }
                TransferStatus::NeedsRetry => {}
                TransferStatus::NeedsRetryLowerConcurrency => {
                    concurrency = policy.degraded_concurrency(ctx.parallel, attempt);
                    ctx.last_max_concurrency = Some(concurrency);
                    debug!("Lowering concurrency for {} to {}", ctx.dst_file_name, concurrency);
                }
                status => {
                    let name = ctx.dst_file_name.clone();
                    return Err(take_error(ctx, || format!("uploading {} ended with status {}", name, status)));
                }
            }

            warn!(
                "Attempt {}/{} for {} needs retry: {}",
                attempt + 1,
                policy.max_retries,
                ctx.dst_file_name,
                ctx.last_error.as_ref().map(ToString::to_string).unwrap_or_default()
            );
            if policy.sleep {
                self.pause(ctx, policy.backoff_for_attempt(attempt)).await?;
            }
        }

        let name = ctx.dst_file_name.clone();
        Err(take_error(ctx, || format!("unknown error uploading {}", name)))
    }

    /// Upload one file and confirm it became visible.
    ///
    /// After an upload or skip the object is probed until it shows up; if it
    /// never does, the whole upload is repeated. When every round fails the
    /// status is set to `Error` and `Ok` is returned.
    pub async fn upload_one_file_with_retry(
        &self,
        client: &dyn StorageClient,
        ctx: &mut TransferContext,
    ) -> Result<()> {
        let verify = &self.config.verify;

        for round in 0..verify.outer_attempts {
            self.upload_one_file(client, ctx).await?;

            if !matches!(ctx.status, TransferStatus::Uploaded | TransferStatus::Skipped) {
                return Ok(());
            }
            if ctx.presigned_url.is_some() {
                // A presigned URL cannot be probed; trust the upload.
                return Ok(());
            }
            if self.verify_visible(client, ctx).await? {
                return Ok(());
            }
            warn!(
                "{} not visible after upload, retrying ({}/{})",
                ctx.dst_file_name,
                round + 1,
                verify.outer_attempts
            );
        }

        info!(
            "{} never became visible after {} uploads",
            ctx.dst_file_name, verify.outer_attempts
        );
        ctx.status = TransferStatus::Error;
        Ok(())
    }

    /// Probe until the object shows up. Restores the pre-probe status on
    /// success; leaves `NotFound` otherwise.
    async fn verify_visible(&self, client: &dyn StorageClient, ctx: &mut TransferContext) -> Result<bool> {
        let verify = &self.config.verify;
        let status = ctx.status;
        let name = ctx.dst_file_name.clone();

        for probe in 0..verify.probe_attempts {
            // Probe the service, not the header cached by the upload.
            ctx.status = TransferStatus::Pending;
            let outcome = client.get_file_header(ctx, &name).await?;
            if outcome.status == TransferStatus::NotFound {
                debug!("{} not visible yet (probe {})", name, probe + 1);
                ctx.status = TransferStatus::NotFound;
                self.pause(ctx, verify.probe_pause()).await?;
                continue;
            }
            if let Some(err) = &outcome.error {
                info!("Error while checking header of {}: {}", name, err);
            }
            ctx.status = status;
            return Ok(true);
        }
        Ok(false)
    }
}
