//! Google Cloud Storage backend.
//!
//! Speaks the XML API directly: `HEAD` for object metadata, a single `PUT`
//! per upload and a streamed `GET` per download. Object metadata travels in
//! `x-goog-meta-*` headers.

mod client;
mod location;

pub use client::{classify_failure, GcsClient, Operation};
pub use location::{endpoint, file_url, GcsLocation};

/// Metadata header carrying the content digest.
pub const DIGEST_HEADER: &str = "x-goog-meta-sfc-digest";
/// Metadata header carrying the material descriptor.
pub const MATDESC_HEADER: &str = "x-goog-meta-matdesc";
/// Metadata header carrying the encryption envelope.
pub const ENCRYPTION_DATA_HEADER: &str = "x-goog-meta-encryptiondata";
