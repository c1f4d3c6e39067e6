//! SHA-256 content digests in the base64 form stored with objects.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use stagexfer_common::Result;

const READ_BUFFER: usize = 64 * 1024;

pub fn sha256_digest_bytes(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Digest of a file, read in chunks.
pub async fn sha256_digest_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}
