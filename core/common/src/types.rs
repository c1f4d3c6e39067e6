//! Common types used throughout stagexfer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Cloud backend a stage lives on.
///
/// This is a closed set: an unknown tag is an error, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationType {
    #[serde(rename = "S3")]
    S3,
    #[serde(rename = "AZURE")]
    Azure,
    #[serde(rename = "GCS")]
    Gcs,
    #[serde(rename = "LOCAL_FS")]
    LocalFs,
}

impl LocationType {
    /// Wire tag as sent by the service.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "S3",
            Self::Azure => "AZURE",
            Self::Gcs => "GCS",
            Self::LocalFs => "LOCAL_FS",
        }
    }
}

impl FromStr for LocationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "S3" => Ok(Self::S3),
            "AZURE" => Ok(Self::Azure),
            "GCS" => Ok(Self::Gcs),
            "LOCAL_FS" => Ok(Self::LocalFs),
            _ => Err(crate::Error::UnsupportedLocation(s.to_string())),
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential string that zeroizes on drop and never prints itself.
#[derive(Clone, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token. Use immediately, do not store.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretToken([REDACTED])")
    }
}

/// Credentials handed over with a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCredentials {
    /// Downscoped GCS access token. Absent when presigned URLs are used.
    #[serde(rename = "GCS_ACCESS_TOKEN", default)]
    pub gcs_access_token: Option<SecretToken>,
}

/// Stage location descriptor as supplied by the session layer.
///
/// Read-only to the transfer engine and shared between concurrent transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLocation {
    /// Declared backend tag (`GCS`, `LOCAL_FS`, ...).
    pub location_type: String,
    /// `bucket/base/path/` for cloud stages, a directory for local stages.
    pub location: String,
    #[serde(default)]
    pub region: String,
    /// Custom endpoint host, overrides the provider default.
    #[serde(default)]
    pub end_point: String,
    #[serde(default)]
    pub use_regional_url: bool,
    #[serde(default)]
    pub is_client_side_encrypted: bool,
    #[serde(default)]
    pub creds: StageCredentials,
    /// Presigned URL for the single file of this transfer, if issued.
    #[serde(default)]
    pub presigned_url: Option<String>,
}

impl StageLocation {
    /// Create a descriptor with only the type and location set.
    pub fn new(location_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            location_type: location_type.into(),
            location: location.into(),
            region: String::new(),
            end_point: String::new(),
            use_regional_url: false,
            is_client_side_encrypted: false,
            creds: StageCredentials::default(),
            presigned_url: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.creds.gcs_access_token = Some(SecretToken::new(token));
        self
    }

    pub fn with_end_point(mut self, end_point: impl Into<String>) -> Self {
        self.end_point = end_point.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Parse the declared location type.
    pub fn parsed_type(&self) -> crate::Result<LocationType> {
        self.location_type.parse()
    }

    /// Parse a descriptor from its JSON form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Provider session handle produced by `create_client`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientHandle {
    /// Requests carry `Authorization: Bearer <token>`.
    Bearer(SecretToken),
    /// No authorization header; a presigned URL (or the local filesystem)
    /// is authoritative.
    Unauthenticated,
}

impl ClientHandle {
    /// Bearer token, if this handle carries one.
    pub fn bearer(&self) -> Option<&SecretToken> {
        match self {
            Self::Bearer(token) => Some(token),
            Self::Unauthenticated => None,
        }
    }
}

/// Envelope metadata of an encrypted object, as stored next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Base64 wrapped content key.
    pub key: String,
    /// Base64 content IV.
    pub iv: String,
    /// Material descriptor (JSON text).
    pub matdesc: String,
}

/// What a provider currently knows about a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileHeader {
    pub digest: Option<String>,
    pub content_length: u64,
    pub encryption_metadata: Option<EncryptionMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_location_type_parse() {
        assert_eq!("GCS".parse::<LocationType>().unwrap(), LocationType::Gcs);
        assert_eq!("gcs".parse::<LocationType>().unwrap(), LocationType::Gcs);
        assert_eq!(
            "LOCAL_FS".parse::<LocationType>().unwrap(),
            LocationType::LocalFs
        );
        assert!(matches!(
            "FTP".parse::<LocationType>(),
            Err(crate::Error::UnsupportedLocation(_))
        ));
    }

    #[test]
    fn test_stage_location_from_json() {
        let json = r#"{
            "locationType": "GCS",
            "location": "my-bucket/stage/path/",
            "region": "US-CENTRAL1",
            "creds": { "GCS_ACCESS_TOKEN": "ya29.token" }
        }"#;
        let stage = StageLocation::from_json(json).unwrap();
        assert_eq!(stage.parsed_type().unwrap(), LocationType::Gcs);
        assert_eq!(stage.location, "my-bucket/stage/path/");
        assert_eq!(
            stage.creds.gcs_access_token.as_ref().map(|t| t.expose()),
            Some("ya29.token")
        );
        assert!(stage.presigned_url.is_none());
        assert!(!stage.use_regional_url);
    }

    #[test]
    fn test_client_handle_bearer() {
        let handle = ClientHandle::Bearer(SecretToken::new("abc"));
        assert_eq!(handle.bearer().map(|t| t.expose()), Some("abc"));
        assert!(ClientHandle::Unauthenticated.bearer().is_none());
    }

    proptest! {
        #[test]
        fn secret_token_debug_never_leaks(token in "[0-9][a-z0-9]{8,40}") {
            let rendered = format!("{:?}", SecretToken::new(token.clone()));
            prop_assert!(!rendered.contains(&token));
        }
    }
}
