//! Common types shared across the stagexfer crates.
//!
//! This crate holds the vocabulary every layer speaks: the error type, the
//! stage location descriptor, the per-call transfer status and the remote
//! file header.

pub mod error;
pub mod status;
pub mod types;

pub use error::{Error, Result};
pub use status::TransferStatus;
pub use types::{
    ClientHandle, EncryptionMetadata, FileHeader, LocationType, SecretToken, StageCredentials,
    StageLocation,
};
