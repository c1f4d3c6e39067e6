//! stagexfer transfer engine
//!
//! Provider-agnostic orchestration of single-file stage transfers:
//! - Upload with existence probe, skip and overwrite semantics
//! - Retry with capped exponential backoff and concurrency degradation
//! - Post-upload visibility verification
//! - Download with envelope decryption into a file or an in-memory stream

pub mod config;
mod download;
pub mod engine;
pub mod retry;
mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{TransferConfig, DEFAULT_MULTIPART_THRESHOLD};
pub use engine::TransferEngine;
pub use retry::{degraded_concurrency, RetryPolicy, VerifyPolicy};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _config = TransferConfig::default();
        let _retry = RetryPolicy::default();
        let _verify = VerifyPolicy::default();
    }
}
