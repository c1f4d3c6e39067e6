//! Stage location to GCS URL mapping.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use stagexfer_common::{Error, Result, StageLocation};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Region whose stages are only reachable through the regional endpoint.
const REGIONAL_ONLY: &str = "me-central2";

/// Characters left as-is in an object name; everything else is escaped.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Bucket and key prefix parsed from a stage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsLocation {
    pub bucket: String,
    /// Key prefix; empty or ending with `/`.
    pub path: String,
}

impl GcsLocation {
    /// Split `bucket/path/...` at the first slash.
    pub fn parse(location: &str) -> Self {
        match location.split_once('/') {
            Some((bucket, path)) => {
                let mut path = path.to_string();
                if !path.is_empty() && !path.ends_with('/') {
                    path.push('/');
                }
                Self {
                    bucket: bucket.to_string(),
                    path,
                }
            }
            None => Self {
                bucket: location.to_string(),
                path: String::new(),
            },
        }
    }
}

/// Base URL for requests against `stage`.
pub fn endpoint(stage: &StageLocation) -> String {
    let custom = stage.end_point.trim();
    if !custom.is_empty() {
        let custom = custom.trim_end_matches('/');
        return if custom.contains("://") {
            custom.to_string()
        } else {
            format!("https://{}", custom)
        };
    }

    let region = stage.region.trim();
    if !region.is_empty() && (region.eq_ignore_ascii_case(REGIONAL_ONLY) || stage.use_regional_url) {
        return format!("https://storage.{}.rep.googleapis.com", region.to_lowercase());
    }

    DEFAULT_ENDPOINT.to_string()
}

/// URL of `file_name` under the stage's bucket and prefix.
pub fn file_url(stage: &StageLocation, file_name: &str) -> Result<Url> {
    let location = GcsLocation::parse(&stage.location);
    if location.bucket.is_empty() {
        return Err(Error::InvalidInput(format!(
            "stage location '{}' has no bucket",
            stage.location
        )));
    }

    let object = format!("{}{}", location.path, file_name.trim_start_matches('/'));
    let raw = format!(
        "{}/{}/{}",
        endpoint(stage),
        location.bucket,
        utf8_percent_encode(&object, OBJECT_NAME)
    );
    Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid object URL {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            GcsLocation::parse("my-bucket/stages/abc"),
            GcsLocation {
                bucket: "my-bucket".to_string(),
                path: "stages/abc/".to_string()
            }
        );
        assert_eq!(GcsLocation::parse("my-bucket/stages/").path, "stages/");
        assert_eq!(GcsLocation::parse("my-bucket").path, "");
        assert_eq!(GcsLocation::parse("my-bucket/").path, "");
    }

    #[test]
    fn test_endpoint_selection() {
        let stage = StageLocation::new("GCS", "b");
        assert_eq!(endpoint(&stage), "https://storage.googleapis.com");

        let regional = StageLocation::new("GCS", "b").with_region("ME-CENTRAL2");
        assert_eq!(endpoint(&regional), "https://storage.me-central2.rep.googleapis.com");

        let mut flagged = StageLocation::new("GCS", "b").with_region("europe-west4");
        flagged.use_regional_url = true;
        assert_eq!(endpoint(&flagged), "https://storage.europe-west4.rep.googleapis.com");

        let custom = StageLocation::new("GCS", "b")
            .with_region("me-central2")
            .with_end_point("storage.example.com");
        assert_eq!(endpoint(&custom), "https://storage.example.com");

        let schemed = StageLocation::new("GCS", "b").with_end_point("http://127.0.0.1:9000/");
        assert_eq!(endpoint(&schemed), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_file_url_escapes_object_name() {
        let stage = StageLocation::new("GCS", "bucket/dir one");
        let url = file_url(&stage, "/data file+1.csv").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/bucket/dir%20one%2Fdata%20file%2B1.csv"
        );
    }

    #[test]
    fn test_file_url_requires_bucket() {
        let stage = StageLocation::new("GCS", "");
        assert!(matches!(file_url(&stage, "a"), Err(Error::InvalidInput(_))));
    }
}
