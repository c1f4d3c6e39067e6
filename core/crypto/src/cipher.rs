//! Envelope cipher seam used by the transfer engine.
//!
//! The transfer engine never touches key material directly: it hands the
//! envelope and the stage material to an [`EnvelopeCipher`] and gets a
//! plaintext file or buffer back.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::aead;
use crate::envelope::{EncryptionMaterial, MaterialDescriptor};
use crate::keys::{ContentIv, ContentKey, StageMasterKey, KEY_LENGTH};
use crate::stream::{DecryptingStream, EncryptingStream, DEFAULT_CHUNK_SIZE};
use stagexfer_common::{EncryptionMetadata, Error, Result};

/// Stream transform applied around a transfer.
pub trait EnvelopeCipher: Send + Sync {
    /// Encrypt `src` into a new file under `tmp_dir`.
    ///
    /// Returns the envelope to publish with the object and the path of the
    /// ciphertext file.
    fn encrypt_file(
        &self,
        material: &EncryptionMaterial,
        src: &Path,
        tmp_dir: &Path,
    ) -> Result<(EncryptionMetadata, PathBuf)>;

    /// Decrypt `src` into a new file under `tmp_dir` and return its path.
    fn decrypt_file(
        &self,
        meta: &EncryptionMetadata,
        material: &EncryptionMaterial,
        src: &Path,
        tmp_dir: &Path,
    ) -> Result<PathBuf>;

    /// Decrypt an in-memory body.
    fn decrypt_bytes(
        &self,
        meta: &EncryptionMetadata,
        material: &EncryptionMaterial,
        data: &[u8],
    ) -> Result<Vec<u8>>;
}

/// XChaCha20-Poly1305 envelope cipher.
///
/// The content key is wrapped by the stage master key; the body is sealed
/// in frames under a key derived from the content key and the IV.
#[derive(Debug, Clone)]
pub struct AeadEnvelopeCipher {
    chunk_size: usize,
}

impl AeadEnvelopeCipher {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Recover the body key for `meta`, checking it belongs to `material`.
    fn unwrap_body_key(
        &self,
        meta: &EncryptionMetadata,
        material: &EncryptionMaterial,
    ) -> Result<ContentKey> {
        if !meta.matdesc.is_empty() {
            let desc = MaterialDescriptor::parse(&meta.matdesc)?;
            if desc.smk_id != material.smk_id.to_string() {
                return Err(Error::Crypto(format!(
                    "Object was sealed under master key {}, material carries {}",
                    desc.smk_id, material.smk_id
                )));
            }
        }

        let master = StageMasterKey::from_base64(&material.query_stage_master_key)?;
        let wrapped = STANDARD
            .decode(meta.key.trim())
            .map_err(|e| Error::Crypto(format!("Invalid base64 wrapped key: {}", e)))?;
        let mut unwrapped = aead::decrypt(master.as_bytes(), &wrapped)?;
        let content_key = ContentKey::from_slice(&unwrapped);
        zeroize::Zeroize::zeroize(&mut unwrapped);

        let iv = ContentIv::from_base64(&meta.iv)?;
        Ok(content_key?.derive_body_key(&iv))
    }
}

impl Default for AeadEnvelopeCipher {
    fn default() -> Self {
        Self::new()
    }
}

fn temp_path(tmp_dir: &Path, src: &Path, suffix: &str) -> PathBuf {
    let stem = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stagexfer".to_string());
    tmp_dir.join(format!("{}.{}.{}", stem, Uuid::new_v4(), suffix))
}

impl EnvelopeCipher for AeadEnvelopeCipher {
    fn encrypt_file(
        &self,
        material: &EncryptionMaterial,
        src: &Path,
        tmp_dir: &Path,
    ) -> Result<(EncryptionMetadata, PathBuf)> {
        let master = StageMasterKey::from_base64(&material.query_stage_master_key)?;
        let content_key = ContentKey::generate();
        let iv = ContentIv::generate();
        let body_key = content_key.derive_body_key(&iv);

        let out_path = temp_path(tmp_dir, src, "enc");
        let reader = BufReader::new(File::open(src)?);
        let writer = BufWriter::new(File::create(&out_path)?);
        EncryptingStream::new(body_key.as_bytes())?
            .with_chunk_size(self.chunk_size)
            .encrypt_stream(reader, writer)?;

        let wrapped = aead::encrypt(master.as_bytes(), content_key.as_bytes())?;
        let meta = EncryptionMetadata {
            key: STANDARD.encode(wrapped),
            iv: iv.to_base64(),
            matdesc: MaterialDescriptor::for_material(material, KEY_LENGTH * 8).to_json()?,
        };
        Ok((meta, out_path))
    }

    fn decrypt_file(
        &self,
        meta: &EncryptionMetadata,
        material: &EncryptionMaterial,
        src: &Path,
        tmp_dir: &Path,
    ) -> Result<PathBuf> {
        let body_key = self.unwrap_body_key(meta, material)?;

        let out_path = temp_path(tmp_dir, src, "dec");
        let reader = BufReader::new(File::open(src)?);
        let writer = BufWriter::new(File::create(&out_path)?);
        if let Err(e) = DecryptingStream::new(body_key.as_bytes())?.decrypt_stream(reader, writer) {
            let _ = fs::remove_file(&out_path);
            return Err(e);
        }
        Ok(out_path)
    }

    fn decrypt_bytes(
        &self,
        meta: &EncryptionMetadata,
        material: &EncryptionMaterial,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let body_key = self.unwrap_body_key(meta, material)?;
        let mut plaintext = Vec::with_capacity(data.len());
        DecryptingStream::new(body_key.as_bytes())?.decrypt_stream(data, &mut plaintext)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn material(smk_id: i64) -> EncryptionMaterial {
        EncryptionMaterial {
            query_stage_master_key: STANDARD.encode([5u8; KEY_LENGTH]),
            query_id: "query-1".to_string(),
            smk_id,
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("data.csv");
        fs::write(&src, b"id,name\n1,alpha\n2,beta\n").unwrap();

        let cipher = AeadEnvelopeCipher::new().with_chunk_size(8);
        let (meta, encrypted) = cipher.encrypt_file(&material(42), &src, dir.path()).unwrap();
        assert_ne!(fs::read(&encrypted).unwrap(), fs::read(&src).unwrap());

        let decrypted = cipher
            .decrypt_file(&meta, &material(42), &encrypted, dir.path())
            .unwrap();
        assert_eq!(fs::read(decrypted).unwrap(), b"id,name\n1,alpha\n2,beta\n");
    }

    #[test]
    fn test_bytes_roundtrip_after_encrypt_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("blob.bin");
        fs::write(&src, vec![0x5Au8; 1000]).unwrap();

        let cipher = AeadEnvelopeCipher::new();
        let (meta, encrypted) = cipher.encrypt_file(&material(1), &src, dir.path()).unwrap();
        let body = fs::read(encrypted).unwrap();

        let plaintext = cipher.decrypt_bytes(&meta, &material(1), &body).unwrap();
        assert_eq!(plaintext, vec![0x5Au8; 1000]);
    }

    #[test]
    fn test_mismatched_master_key_id_rejected() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"abc").unwrap();

        let cipher = AeadEnvelopeCipher::new();
        let (meta, encrypted) = cipher.encrypt_file(&material(1), &src, dir.path()).unwrap();
        let result = cipher.decrypt_file(&meta, &material(2), &encrypted, dir.path());
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"payload").unwrap();

        let cipher = AeadEnvelopeCipher::new();
        let (mut meta, encrypted) = cipher.encrypt_file(&material(1), &src, dir.path()).unwrap();
        meta.iv = ContentIv::generate().to_base64();

        let body = fs::read(encrypted).unwrap();
        assert!(cipher.decrypt_bytes(&meta, &material(1), &body).is_err());
    }
}
