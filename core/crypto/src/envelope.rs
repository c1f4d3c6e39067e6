//! Envelope metadata as exchanged with the storage service.

use serde::{Deserialize, Serialize};
use std::fmt;

use stagexfer_common::{EncryptionMetadata, Error, Result};

/// Encryption mode advertised in the envelope.
pub const ENCRYPTION_MODE: &str = "FullBlob";
/// Identifier of the wrapping key slot.
pub const KEY_ID: &str = "symmKey1";
/// Algorithm identifier for both content and key wrapping.
pub const ALGORITHM: &str = "AES_CBC_256";
/// Envelope protocol version.
pub const PROTOCOL_VERSION: &str = "1.0";
/// Library tag expected by readers of the envelope.
pub const ENCRYPTION_LIBRARY: &str = "Java 5.3.0";

/// Encryption material handed to the client for one PUT/GET.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMaterial {
    /// Base64 query-stage master key.
    pub query_stage_master_key: String,
    pub query_id: String,
    pub smk_id: i64,
}

impl fmt::Debug for EncryptionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionMaterial")
            .field("query_stage_master_key", &"[REDACTED]")
            .field("query_id", &self.query_id)
            .field("smk_id", &self.smk_id)
            .finish()
    }
}

/// Material descriptor stored alongside an encrypted object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialDescriptor {
    #[serde(rename = "smkId")]
    pub smk_id: String,
    #[serde(rename = "queryId")]
    pub query_id: String,
    #[serde(rename = "keySize")]
    pub key_size: String,
}

impl MaterialDescriptor {
    /// Descriptor for content sealed under `material`.
    pub fn for_material(material: &EncryptionMaterial, key_bits: usize) -> Self {
        Self {
            smk_id: material.smk_id.to_string(),
            query_id: material.query_id.clone(),
            key_size: key_bits.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Protocol(format!("Malformed material descriptor: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedContentKey {
    #[serde(rename = "KeyId")]
    pub key_id: String,
    #[serde(rename = "EncryptionKey")]
    pub encryption_key: String,
    #[serde(rename = "Algorithm")]
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionAgent {
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "EncryptionAlgorithm")]
    pub encryption_algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWrappingMetadata {
    #[serde(rename = "EncryptionLibrary")]
    pub encryption_library: String,
}

/// JSON envelope carried in the object's encryption-data metadata header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionData {
    #[serde(rename = "EncryptionMode")]
    pub encryption_mode: String,
    #[serde(rename = "WrappedContentKey")]
    pub wrapped_content_key: WrappedContentKey,
    #[serde(rename = "EncryptionAgent")]
    pub encryption_agent: EncryptionAgent,
    #[serde(rename = "ContentEncryptionIV")]
    pub content_encryption_iv: String,
    #[serde(rename = "KeyWrappingMetadata")]
    pub key_wrapping_metadata: KeyWrappingMetadata,
}

impl EncryptionData {
    /// Build the envelope for an object sealed with `meta`.
    pub fn from_metadata(meta: &EncryptionMetadata) -> Self {
        Self {
            encryption_mode: ENCRYPTION_MODE.to_string(),
            wrapped_content_key: WrappedContentKey {
                key_id: KEY_ID.to_string(),
                encryption_key: meta.key.clone(),
                algorithm: ALGORITHM.to_string(),
            },
            encryption_agent: EncryptionAgent {
                protocol: PROTOCOL_VERSION.to_string(),
                encryption_algorithm: ALGORITHM.to_string(),
            },
            content_encryption_iv: meta.iv.clone(),
            key_wrapping_metadata: KeyWrappingMetadata {
                encryption_library: ENCRYPTION_LIBRARY.to_string(),
            },
        }
    }

    /// Serialize for use as a header value.
    pub fn to_header_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a header value.
    ///
    /// # Errors
    /// - `Error::Protocol` when the JSON is malformed; an unreadable envelope
    ///   is never treated as "not encrypted".
    pub fn parse_header_value(value: &str) -> Result<Self> {
        serde_json::from_str(value)
            .map_err(|e| Error::Protocol(format!("Malformed encryption envelope: {}", e)))
    }

    /// Envelope metadata paired with the separately stored descriptor.
    pub fn into_metadata(self, matdesc: Option<String>) -> EncryptionMetadata {
        EncryptionMetadata {
            key: self.wrapped_content_key.encryption_key,
            iv: self.content_encryption_iv,
            matdesc: matdesc.unwrap_or_default(),
        }
    }
}
