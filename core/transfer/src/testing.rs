//! Scripted storage client for orchestration tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use stagexfer_common::{
    ClientHandle, EncryptionMetadata, Error, FileHeader, Result, StageLocation, TransferStatus,
};
use stagexfer_storage::{DownloadTarget, Outcome, StorageClient, TransferContext};

/// One scripted answer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// The primitive succeeds.
    Ok,
    /// The object does not exist.
    Missing,
    /// The primitive fails with `status` caused by HTTP `code`.
    Fail(TransferStatus, u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Probe,
    Upload(usize),
    Download(usize),
}

/// Plays back scripted outcomes. The last step of each script repeats.
pub(crate) struct ScriptedClient {
    probes: Mutex<VecDeque<Step>>,
    uploads: Mutex<VecDeque<Step>>,
    downloads: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    body: Vec<u8>,
    envelope: Option<EncryptionMetadata>,
    download_header: bool,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self {
            probes: Mutex::new(VecDeque::from([Step::Missing])),
            uploads: Mutex::new(VecDeque::from([Step::Ok])),
            downloads: Mutex::new(VecDeque::from([Step::Ok])),
            calls: Mutex::new(Vec::new()),
            body: b"remote bytes".to_vec(),
            envelope: None,
            download_header: true,
        }
    }

    pub(crate) fn probes(self, steps: impl IntoIterator<Item = Step>) -> Self {
        *self.probes.lock().unwrap() = steps.into_iter().collect();
        self
    }

    pub(crate) fn uploads(self, steps: impl IntoIterator<Item = Step>) -> Self {
        *self.uploads.lock().unwrap() = steps.into_iter().collect();
        self
    }

    pub(crate) fn downloads(self, steps: impl IntoIterator<Item = Step>) -> Self {
        *self.downloads.lock().unwrap() = steps.into_iter().collect();
        self
    }

    pub(crate) fn serving(mut self, body: &[u8], envelope: Option<EncryptionMetadata>) -> Self {
        self.body = body.to_vec();
        self.envelope = envelope;
        self
    }

    /// Downloads succeed without reporting object metadata.
    pub(crate) fn headerless_downloads(mut self) -> Self {
        self.download_header = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn next(script: &Mutex<VecDeque<Step>>) -> Step {
        let mut script = script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().copied().unwrap_or(Step::Ok)
        }
    }

    fn remote_header(&self) -> FileHeader {
        FileHeader {
            digest: Some("remote-digest".to_string()),
            content_length: self.body.len() as u64,
            encryption_metadata: self.envelope.clone(),
        }
    }
}

fn scripted_error(code: u16) -> Error {
    Error::http(code, "scripted")
}

#[async_trait]
impl StorageClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_client(&self, _stage: &StageLocation, _use_accelerate: bool) -> Result<ClientHandle> {
        Ok(ClientHandle::Unauthenticated)
    }

    async fn get_file_header(&self, ctx: &TransferContext, _file_name: &str) -> Result<Outcome> {
        if let Some(header) = ctx.cached_header() {
            return Ok(Outcome::status(ctx.status).with_header(header.clone()));
        }
        self.calls.lock().unwrap().push(Call::Probe);
        Ok(match Self::next(&self.probes) {
            Step::Ok => Outcome::status(ctx.present_status()).with_header(self.remote_header()),
            Step::Missing => Outcome::status(TransferStatus::NotFound),
            Step::Fail(status, code) => Outcome::failed(status, scripted_error(code)),
        })
    }

    async fn upload_file(
        &self,
        ctx: &TransferContext,
        max_concurrency: usize,
        _multipart_threshold: u64,
    ) -> Result<Outcome> {
        self.calls.lock().unwrap().push(Call::Upload(max_concurrency));
        Ok(match Self::next(&self.uploads) {
            Step::Ok => {
                let header = FileHeader {
                    digest: Some(ctx.sha256_digest.clone()),
                    content_length: ctx.src_file_size,
                    encryption_metadata: ctx.encrypt_meta.clone(),
                };
                Outcome::status(TransferStatus::Uploaded)
                    .with_header(header)
                    .with_transferred(ctx.src_file_size)
            }
            Step::Missing => Outcome::failed(TransferStatus::Error, scripted_error(404)),
            Step::Fail(status, code) => Outcome::failed(status, scripted_error(code)),
        })
    }

    async fn native_download_file(
        &self,
        ctx: &TransferContext,
        dest: &Path,
        max_concurrency: usize,
    ) -> Result<Outcome> {
        self.calls.lock().unwrap().push(Call::Download(max_concurrency));
        Ok(match Self::next(&self.downloads) {
            Step::Ok => {
                let mut outcome =
                    Outcome::status(TransferStatus::Downloaded).with_transferred(self.body.len() as u64);
                if self.download_header {
                    outcome = outcome.with_header(self.remote_header());
                }
                match ctx.target {
                    DownloadTarget::Stream(_) => outcome.with_body(self.body.clone()),
                    DownloadTarget::File => {
                        tokio::fs::write(dest, &self.body).await?;
                        outcome
                    }
                }
            }
            Step::Missing => Outcome::failed(TransferStatus::NotFound, scripted_error(404)),
            Step::Fail(status, code) => Outcome::failed(status, scripted_error(code)),
        })
    }
}
