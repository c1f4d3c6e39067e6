//! Streaming body encryption.
//!
//! Bodies are sealed in independently authenticated frames so files larger
//! than memory can be processed.
//!
//! # Format
//! - Header: version (1 byte) + chunk_size (4 bytes LE)
//! - Frames: sealed length (4 bytes LE) + `encrypt(index || last || data)`
//!
//! The `last` flag on the final frame makes truncation detectable.

use std::io::{ErrorKind, Read, Write};

use crate::aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
use crate::keys::KEY_LENGTH;
use stagexfer_common::{Error, Result};

/// Default chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Header size: version (1) + chunk_size (4).
pub const HEADER_SIZE: usize = 5;

/// Stream encryption version.
pub const STREAM_VERSION: u8 = 1;

/// Frame prefix inside the sealed plaintext: index (8) + last flag (1).
const FRAME_PREFIX: usize = 9;

/// Encrypting stream that processes data in chunks.
pub struct EncryptingStream<'a> {
    key: &'a [u8],
    chunk_size: usize,
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    ///
    /// # Errors
    /// - Returns error if key length is invalid
    pub fn new(key: &'a [u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH {
            return Err(Error::Crypto("Invalid key length".to_string()));
        }
        Ok(Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Set custom chunk size. Zero is bumped to one.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Encrypt everything from `reader` into `writer`.
    ///
    /// Returns the number of plaintext bytes consumed.
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        writer.write_all(&[STREAM_VERSION])?;
        writer.write_all(&(self.chunk_size as u32).to_le_bytes())?;

        let mut total_bytes = 0u64;
        let mut index = 0u64;
        let mut current = read_up_to(&mut reader, self.chunk_size)?;

        loop {
            // Look one chunk ahead so the final frame can be flagged.
            let next = if current.len() < self.chunk_size {
                Vec::new()
            } else {
                read_up_to(&mut reader, self.chunk_size)?
            };
            let last = next.is_empty();

            let mut frame = Vec::with_capacity(FRAME_PREFIX + current.len());
            frame.extend_from_slice(&index.to_le_bytes());
            frame.push(u8::from(last));
            frame.extend_from_slice(&current);

            let sealed = encrypt(self.key, &frame)?;
            writer.write_all(&(sealed.len() as u32).to_le_bytes())?;
            writer.write_all(&sealed)?;
            total_bytes += current.len() as u64;

            if last {
                break;
            }
            current = next;
            index += 1;
        }

        writer.flush()?;
        Ok(total_bytes)
    }
}

/// Decrypting stream that processes encrypted frames.
pub struct DecryptingStream<'a> {
    key: &'a [u8],
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    ///
    /// # Errors
    /// - Returns error if key length is invalid
    pub fn new(key: &'a [u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH {
            return Err(Error::Crypto("Invalid key length".to_string()));
        }
        Ok(Self { key })
    }

    /// Decrypt data from reader and write the plaintext to writer.
    ///
    /// Returns the plaintext length.
    ///
    /// # Errors
    /// - Unsupported version or oversized frame
    /// - Truncated stream (no frame flagged as last)
    /// - Authentication failure or frame reordering
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_or_truncated(&mut reader, &mut header)?;
        if header[0] != STREAM_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported stream version: {}",
                header[0]
            )));
        }
        let chunk_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let max_frame = NONCE_SIZE + FRAME_PREFIX + chunk_size + TAG_SIZE;

        let mut total_bytes = 0u64;
        let mut expected_index = 0u64;

        loop {
            let mut len_bytes = [0u8; 4];
            read_exact_or_truncated(&mut reader, &mut len_bytes)?;
            let sealed_len = u32::from_le_bytes(len_bytes) as usize;
            if sealed_len > max_frame {
                return Err(Error::Crypto(format!(
                    "Frame of {} bytes exceeds limit {}",
                    sealed_len, max_frame
                )));
            }

            let mut sealed = vec![0u8; sealed_len];
            read_exact_or_truncated(&mut reader, &mut sealed)?;
            let frame = decrypt(self.key, &sealed)?;
            if frame.len() < FRAME_PREFIX {
                return Err(Error::Crypto("Invalid frame format".to_string()));
            }

            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&frame[..8]);
            if u64::from_le_bytes(index_bytes) != expected_index {
                return Err(Error::Crypto("Frame order mismatch".to_string()));
            }

            let plaintext = &frame[FRAME_PREFIX..];
            writer.write_all(plaintext)?;
            total_bytes += plaintext.len() as u64;

            if frame[8] == 1 {
                break;
            }
            expected_index += 1;
        }

        writer.flush()?;
        Ok(total_bytes)
    }
}

/// Fill up to `limit` bytes, stopping early only at end of input.
fn read_up_to<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<()> {
    reader.read_exact(buffer).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Crypto("Unexpected end of encrypted stream".to_string())
        } else {
            Error::Io(e)
        }
    })
}

/// Encrypt a complete byte slice using streaming encryption.
pub fn encrypt_bytes(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let stream = EncryptingStream::new(key)?;
    let mut output = Vec::new();
    stream.encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice that was encrypted with streaming encryption.
pub fn decrypt_bytes(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let stream = DecryptingStream::new(key)?;
    let mut output = Vec::new();
    stream.decrypt_stream(data, &mut output)?;
    Ok(output)
}
