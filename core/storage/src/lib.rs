//! Stage storage clients for stagexfer.
//!
//! This crate provides the provider protocol layer: a trait with the four
//! primitives every backend implements, the per-file transfer context those
//! primitives read, and a selector that maps a stage's location type to a
//! client.
//!
//! # Design Principles
//! - Provider isolation: each client translates its own HTTP vocabulary into
//!   [`TransferStatus`](stagexfer_common::TransferStatus)
//! - Explicit outcomes: primitives return an [`Outcome`] instead of mutating
//!   shared state
//! - Streaming: file uploads and downloads are streamed; only stream targets
//!   are held in memory

pub mod client;
pub mod context;
pub mod digest;
pub mod gcs;
pub mod http;
pub mod local;
pub mod registry;

pub use client::{Outcome, StorageClient};
pub use context::{Direction, DownloadTarget, TransferContext, UploadSource};
pub use digest::{sha256_digest_bytes, sha256_digest_file};
pub use gcs::GcsClient;
pub use http::HttpConfig;
pub use local::LocalClient;
pub use registry::ClientSelector;
