//! Key types with secure memory handling.
//!
//! All key types zeroize their memory on drop.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use stagexfer_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the content IV carried in the envelope.
pub const IV_LENGTH: usize = 16;

fn decode_fixed<const N: usize>(what: &str, encoded: &str) -> Result<[u8; N]> {
    let mut raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Crypto(format!("Invalid base64 {}: {}", what, e)))?;
    if raw.len() != N {
        let len = raw.len();
        raw.zeroize();
        return Err(Error::Crypto(format!(
            "Invalid {} length: expected {}, got {}",
            what, N, len
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&raw);
    raw.zeroize();
    Ok(out)
}

/// Query-stage master key issued by the service for one PUT/GET.
///
/// Wraps and unwraps the per-file content keys; never touches file data.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StageMasterKey {
    key: [u8; KEY_LENGTH],
}

impl StageMasterKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Decode the base64 form the service hands out.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        decode_fixed::<KEY_LENGTH>("master key", encoded).map(Self::from_bytes)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for StageMasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageMasterKey([REDACTED])")
    }
}

/// Random per-file content key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; KEY_LENGTH],
}

impl ContentKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Rebuild a content key from unwrapped bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(Error::Crypto(format!(
                "Invalid content key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the key that seals the body frames.
    ///
    /// Mixing the IV in binds the body to the envelope it was published with.
    pub fn derive_body_key(&self, iv: &ContentIv) -> ContentKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(iv.as_bytes());
        hasher.update(b"stagexfer-body");

        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&hasher.finalize());
        ContentKey::from_bytes(derived)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey([REDACTED])")
    }
}

/// Content IV published in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentIv([u8; IV_LENGTH]);

impl ContentIv {
    pub fn generate() -> Self {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        decode_fixed::<IV_LENGTH>("IV", encoded).map(Self)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }
}
