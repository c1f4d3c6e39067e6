//! Client-side envelope encryption for stage transfers.
//!
//! This module provides:
//! - The envelope wire format stored as object metadata
//! - Key types with automatic zeroization
//! - Authenticated key wrapping and chunked body encryption
//! - The [`EnvelopeCipher`] seam the transfer engine decrypts through
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod cipher;
pub mod envelope;
pub mod keys;
pub mod stream;

pub use aead::{decrypt, encrypt};
pub use cipher::{AeadEnvelopeCipher, EnvelopeCipher};
pub use envelope::{EncryptionData, EncryptionMaterial, MaterialDescriptor};
pub use keys::{ContentIv, ContentKey, StageMasterKey};
pub use stream::{DecryptingStream, EncryptingStream};
