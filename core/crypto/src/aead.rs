//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! Used to wrap per-file content keys under the stage master key and to seal
//! the individual frames of an encrypted body.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use stagexfer_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext, returning `nonce || ciphertext || tag`.
///
/// The nonce is random, so sealing the same plaintext twice never yields the
/// same output.
///
/// # Errors
/// - Key length is not KEY_LENGTH
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt the output of [`encrypt`].
///
/// # Errors
/// - Key length is not KEY_LENGTH
/// - Input shorter than nonce + tag
/// - Authentication failure (wrong key or tampered data)
pub fn decrypt(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}
