//! Transfer engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use stagexfer_common::{Error, Result};
use stagexfer_storage::HttpConfig;

use crate::retry::{RetryPolicy, VerifyPolicy};

/// Default size above which providers that support it split uploads (64 MiB).
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Configuration for the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub retry: RetryPolicy,
    pub verify: VerifyPolicy,
    pub http: HttpConfig,
    /// Passed to providers as the multipart cut-over size.
    pub multipart_threshold: u64,
    /// Ask providers for accelerated endpoints where they exist.
    pub use_accelerate: bool,
}

impl TransferConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Load a configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Serialization(format!("Invalid transfer config {}: {}", path.display(), e))
        })
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            verify: VerifyPolicy::default(),
            http: HttpConfig::default(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            use_accelerate: false,
        }
    }
}
