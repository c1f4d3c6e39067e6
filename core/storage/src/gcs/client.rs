//! GCS protocol client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

use stagexfer_common::{
    ClientHandle, Error, FileHeader, Result, SecretToken, StageLocation, TransferStatus,
};
use stagexfer_crypto::EncryptionData;

use super::location::file_url;
use super::{DIGEST_HEADER, ENCRYPTION_DATA_HEADER, MATDESC_HEADER};
use crate::client::{Outcome, StorageClient};
use crate::context::{DownloadTarget, TransferContext, UploadSource};
use crate::http::{cancellable, send, HttpConfig, SendFailure};

/// Which primitive produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Header,
    Upload,
    Download,
}

/// Map a non-200 response to a transfer status.
///
/// `bearer` tells whether the request carried a bearer token; without one a
/// 400 means the presigned URL has expired.
pub fn classify_failure(op: Operation, status: StatusCode, bearer: bool) -> TransferStatus {
    match status.as_u16() {
        403 | 408 | 429 | 500 | 503 => TransferStatus::NeedsRetry,
        404 if op != Operation::Upload => TransferStatus::NotFound,
        401 if op == Operation::Header || bearer => TransferStatus::RenewToken,
        400 if op != Operation::Header && !bearer => TransferStatus::RenewPresignedUrl,
        _ => TransferStatus::Error,
    }
}

fn http_error(status: StatusCode) -> Error {
    Error::http(status.as_u16(), status.canonical_reason().unwrap_or("Unknown Status"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| Error::Protocol(format!("Header {} is not valid text", name)))
        })
        .transpose()
}

/// Extract digest, length and envelope from object response headers.
pub(crate) fn parse_object_header(headers: &HeaderMap) -> Result<FileHeader> {
    let digest = header_str(headers, DIGEST_HEADER)?.map(str::to_string);

    let content_length = match header_str(headers, CONTENT_LENGTH.as_str())? {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::Protocol(format!("Invalid content-length '{}': {}", value, e)))?,
        None => 0,
    };

    let encryption_metadata = match header_str(headers, ENCRYPTION_DATA_HEADER)? {
        Some(value) if !value.trim().is_empty() => {
            let matdesc = header_str(headers, MATDESC_HEADER)?.map(str::to_string);
            Some(EncryptionData::parse_header_value(value)?.into_metadata(matdesc))
        }
        _ => None,
    };

    Ok(FileHeader {
        digest,
        content_length,
        encryption_metadata,
    })
}

/// `content-encoding` value for a compression name; gzip is implied.
fn content_encoding(compression: Option<&str>) -> Option<String> {
    let encoding = compression?.trim().to_lowercase();
    if encoding.is_empty() || encoding == "gzip" {
        None
    } else {
        Some(encoding)
    }
}

fn body_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("reading response body: {}", err))
    } else {
        Error::Network(format!("reading response body: {}", err))
    }
}

/// Drain a response body into `dest`, or into memory when `dest` is `None`.
async fn read_body(response: Response, dest: Option<&Path>) -> Result<(u64, Option<Vec<u8>>)> {
    let mut stream = response.bytes_stream();
    match dest {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(body_error)?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok((written, None))
        }
        None => {
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk.map_err(body_error)?);
            }
            Ok((body.len() as u64, Some(body)))
        }
    }
}

/// Google Cloud Storage client.
pub struct GcsClient {
    http: Client,
    timeout: Duration,
}

impl GcsClient {
    /// Create a client with its own connection pool.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            http: config.build_client()?,
            timeout: config.request_timeout(),
        })
    }

    /// URL and bearer token for `file_name`; a presigned URL disables bearer auth.
    fn target<'a>(&self, ctx: &'a TransferContext, file_name: &str) -> Result<(Url, Option<&'a SecretToken>)> {
        if let Some(presigned) = &ctx.presigned_url {
            let url = Url::parse(presigned)
                .map_err(|e| Error::InvalidInput(format!("Invalid presigned URL: {}", e)))?;
            return Ok((url, None));
        }
        let url = file_url(&ctx.stage, file_name)?;
        Ok((url, ctx.client_handle()?.bearer()))
    }

    fn request(&self, method: Method, url: Url, token: Option<&SecretToken>) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match token {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        }
    }
}

#[async_trait]
impl StorageClient for GcsClient {
    fn name(&self) -> &str {
        "gcs"
    }

    fn create_client(&self, stage: &StageLocation, use_accelerate: bool) -> Result<ClientHandle> {
        if use_accelerate {
            debug!("GCS has no accelerated endpoint, ignoring flag");
        }
        match stage.creds.gcs_access_token.as_ref().filter(|t| !t.is_empty()) {
            Some(token) => {
                debug!("Using GCS access token for stage {}", stage.location);
                Ok(ClientHandle::Bearer(token.clone()))
            }
            None => {
                debug!("No GCS access token for stage {}, expecting presigned URLs", stage.location);
                Ok(ClientHandle::Unauthenticated)
            }
        }
    }

    async fn get_file_header(&self, ctx: &TransferContext, file_name: &str) -> Result<Outcome> {
        if let Some(header) = ctx.cached_header() {
            return Ok(Outcome::status(ctx.status).with_header(header.clone()));
        }
        if ctx.presigned_url.is_some() {
            // Presigned URLs only authorize the one verb they were signed for.
            return Ok(Outcome::status(TransferStatus::NotFound));
        }

        let url = file_url(&ctx.stage, file_name)?;
        let token = ctx.client_handle()?.bearer();

        let mut retried_eof = false;
        let response = loop {
            let request = self
                .request(Method::HEAD, url.clone(), token)
                .build()
                .map_err(|e| Error::InvalidInput(format!("Failed to build HEAD request: {}", e)))?;
            match send(&self.http, request, self.timeout, &ctx.cancel).await {
                Ok(response) => break response,
                Err(failure) if !retried_eof && failure.is_premature_close() => {
                    debug!("HEAD {} closed early, retrying once", file_name);
                    retried_eof = true;
                }
                Err(SendFailure::Cancelled) => return Err(Error::Cancelled),
                Err(failure) => {
                    let err = failure.into_error(&format!("HEAD {}", file_name));
                    warn!("Header request for {} failed: {}", file_name, err);
                    return Ok(Outcome::failed(TransferStatus::NeedsRetry, err));
                }
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            let header = parse_object_header(response.headers())?;
            return Ok(Outcome::status(ctx.present_status()).with_header(header));
        }

        match classify_failure(Operation::Header, status, token.is_some()) {
            TransferStatus::NotFound => Ok(Outcome::status(TransferStatus::NotFound)),
            other => {
                debug!("HEAD {} returned {}", file_name, status);
                Ok(Outcome::failed(other, http_error(status)))
            }
        }
    }

    async fn upload_file(
        &self,
        ctx: &TransferContext,
        max_concurrency: usize,
        multipart_threshold: u64,
    ) -> Result<Outcome> {
        debug!(
            "Uploading {} in a single PUT (concurrency {}, multipart threshold {} unused)",
            ctx.dst_file_name, max_concurrency, multipart_threshold
        );
        let (url, token) = self.target(ctx, &ctx.dst_file_name)?;

        let mut builder = self.request(Method::PUT, url, token);
        if let Some(encoding) = content_encoding(ctx.compression.as_deref()) {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        if !ctx.sha256_digest.is_empty() {
            builder = builder.header(DIGEST_HEADER, ctx.sha256_digest.as_str());
        }
        if let Some(meta) = &ctx.encrypt_meta {
            let envelope = EncryptionData::from_metadata(meta).to_header_value()?;
            builder = builder
                .header(ENCRYPTION_DATA_HEADER, envelope)
                .header(MATDESC_HEADER, meta.matdesc.as_str());
        }

        let source = ctx
            .source
            .as_ref()
            .ok_or_else(|| Error::InvalidInput(format!("no upload source for {}", ctx.dst_file_name)))?;
        let size = match source {
            UploadSource::Bytes(bytes) => {
                builder = builder.body(Body::from(bytes.clone()));
                bytes.len() as u64
            }
            UploadSource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let size = file.metadata().await?.len();
                builder = builder
                    .header(CONTENT_LENGTH, size.to_string())
                    .body(Body::wrap_stream(ReaderStream::new(file)));
                size
            }
        };

        let request = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build PUT request: {}", e)))?;
        let response = match send(&self.http, request, self.timeout, &ctx.cancel).await {
            Ok(response) => response,
            Err(SendFailure::Cancelled) => return Err(Error::Cancelled),
            Err(failure) => {
                let err = failure.into_error(&format!("PUT {}", ctx.dst_file_name));
                warn!("Upload of {} failed: {}", ctx.dst_file_name, err);
                return Ok(Outcome::failed(TransferStatus::NeedsRetry, err));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let outcome = classify_failure(Operation::Upload, status, token.is_some());
            debug!("PUT {} returned {}, status {}", ctx.dst_file_name, status, outcome);
            return Ok(Outcome::failed(outcome, http_error(status)));
        }

        let header = FileHeader {
            digest: Some(ctx.sha256_digest.clone()).filter(|d| !d.is_empty()),
            content_length: size,
            encryption_metadata: ctx.encrypt_meta.clone(),
        };
        Ok(Outcome::status(TransferStatus::Uploaded)
            .with_header(header)
            .with_transferred(size))
    }

    async fn native_download_file(
        &self,
        ctx: &TransferContext,
        dest: &Path,
        max_concurrency: usize,
    ) -> Result<Outcome> {
        debug!("Downloading {} (concurrency {})", ctx.src_file_name, max_concurrency);
        let (url, token) = self.target(ctx, &ctx.src_file_name)?;

        let request = self
            .request(Method::GET, url, token)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build GET request: {}", e)))?;
        let response = match send(&self.http, request, self.timeout, &ctx.cancel).await {
            Ok(response) => response,
            Err(SendFailure::Cancelled) => return Err(Error::Cancelled),
            Err(failure) => {
                let err = failure.into_error(&format!("GET {}", ctx.src_file_name));
                warn!("Download of {} failed: {}", ctx.src_file_name, err);
                return Ok(Outcome::failed(TransferStatus::NeedsRetry, err));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let outcome = classify_failure(Operation::Download, status, token.is_some());
            debug!("GET {} returned {}, status {}", ctx.src_file_name, status, outcome);
            return Ok(Outcome::failed(outcome, http_error(status)));
        }

        let header = parse_object_header(response.headers())?;
        let sink = match ctx.target {
            DownloadTarget::File => Some(dest),
            DownloadTarget::Stream(_) => None,
        };
        let (size, body) = match cancellable(&ctx.cancel, read_body(response, sink)).await {
            Ok(read) => read,
            Err(err @ (Error::Timeout(_) | Error::Network(_))) => {
                warn!("Body of {} interrupted: {}", ctx.src_file_name, err);
                return Ok(Outcome::failed(TransferStatus::NeedsRetry, err));
            }
            Err(err) => return Err(err),
        };

        let outcome = Outcome::status(TransferStatus::Downloaded)
            .with_header(header)
            .with_transferred(size);
        Ok(match body {
            Some(body) => outcome.with_body(body),
            None => outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_header_failures() {
        let op = Operation::Header;
        assert_eq!(classify_failure(op, StatusCode::NOT_FOUND, true), TransferStatus::NotFound);
        assert_eq!(classify_failure(op, StatusCode::UNAUTHORIZED, true), TransferStatus::RenewToken);
        assert_eq!(classify_failure(op, StatusCode::FORBIDDEN, true), TransferStatus::NeedsRetry);
        assert_eq!(classify_failure(op, StatusCode::BAD_REQUEST, true), TransferStatus::Error);
        assert_eq!(classify_failure(op, StatusCode::CONFLICT, true), TransferStatus::Error);
    }

    #[test]
    fn test_classify_upload_failures() {
        let op = Operation::Upload;
        for code in [403u16, 408, 429, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_failure(op, status, true), TransferStatus::NeedsRetry);
            assert_eq!(classify_failure(op, status, false), TransferStatus::NeedsRetry);
        }
        assert_eq!(classify_failure(op, StatusCode::UNAUTHORIZED, true), TransferStatus::RenewToken);
        assert_eq!(classify_failure(op, StatusCode::UNAUTHORIZED, false), TransferStatus::Error);
        assert_eq!(classify_failure(op, StatusCode::BAD_REQUEST, false), TransferStatus::RenewPresignedUrl);
        assert_eq!(classify_failure(op, StatusCode::BAD_REQUEST, true), TransferStatus::Error);
        assert_eq!(classify_failure(op, StatusCode::NOT_FOUND, true), TransferStatus::Error);
    }

    #[test]
    fn test_classify_download_not_found() {
        assert_eq!(
            classify_failure(Operation::Download, StatusCode::NOT_FOUND, false),
            TransferStatus::NotFound
        );
        assert_eq!(
            classify_failure(Operation::Download, StatusCode::BAD_REQUEST, false),
            TransferStatus::RenewPresignedUrl
        );
    }

    #[test]
    fn test_content_encoding() {
        assert_eq!(content_encoding(None), None);
        assert_eq!(content_encoding(Some("GZIP")), None);
        assert_eq!(content_encoding(Some("ZSTD")), Some("zstd".to_string()));
    }

    #[test]
    fn test_parse_object_header() {
        let meta = stagexfer_common::EncryptionMetadata {
            key: "a2V5".to_string(),
            iv: "aXY=".to_string(),
            matdesc: r#"{"smkId":"1","queryId":"q","keySize":"256"}"#.to_string(),
        };
        let envelope = EncryptionData::from_metadata(&meta).to_header_value().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(DIGEST_HEADER, HeaderValue::from_static("abc="));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(ENCRYPTION_DATA_HEADER, HeaderValue::from_str(&envelope).unwrap());
        headers.insert(MATDESC_HEADER, HeaderValue::from_str(&meta.matdesc).unwrap());

        let header = parse_object_header(&headers).unwrap();
        assert_eq!(header.digest.as_deref(), Some("abc="));
        assert_eq!(header.content_length, 42);
        assert_eq!(header.encryption_metadata, Some(meta));
    }

    #[test]
    fn test_parse_object_header_rejects_bad_envelope() {
        let mut headers = HeaderMap::new();
        headers.insert(ENCRYPTION_DATA_HEADER, HeaderValue::from_static("{not json"));
        assert!(matches!(parse_object_header(&headers), Err(Error::Protocol(_))));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("many"));
        assert!(matches!(parse_object_header(&headers), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_create_client_handles() {
        let client = GcsClient::new(&HttpConfig::default()).unwrap();

        let stage = StageLocation::new("GCS", "bucket").with_access_token("ya29.token");
        assert!(matches!(client.create_client(&stage, false).unwrap(), ClientHandle::Bearer(_)));

        let anonymous = StageLocation::new("GCS", "bucket").with_access_token("");
        assert_eq!(client.create_client(&anonymous, true).unwrap(), ClientHandle::Unauthenticated);
    }
}
