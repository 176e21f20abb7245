//! Google Cloud Storage backend using the JSON API

use async_trait::async_trait;
use blobserver_core::{BlobError, BlobId, BlobResult, DurableError};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::credentials::TokenSource;
use super::{DurableStore, UploadOutcome};
use crate::atomic::write_atomic_stream;
use crate::fetch::{stall_guarded, DEFAULT_STALL_TIMEOUT};

/// GCS bucket addressed through the JSON API
///
/// The endpoint is configurable so that emulators and authenticating proxies
/// can stand in for `https://storage.googleapis.com`. Requests carry a
/// bearer token when credentials are set.
pub struct GcsStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    credentials: Option<Arc<dyn TokenSource>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl GcsStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: impl Into<String>,
    ) -> BlobResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BlobError::Config(format!("invalid GCS endpoint {:?}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(BlobError::Config(format!(
                "invalid GCS endpoint {:?}",
                endpoint.as_str()
            )));
        }

        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            credentials: None,
        })
    }

    /// Authorize every request with tokens from `credentials`
    pub fn with_credentials(mut self, credentials: Arc<dyn TokenSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response, DurableError> {
        let request = match &self.credentials {
            Some(credentials) => request.bearer_auth(credentials.token().await?),
            None => request,
        };

        tokio::time::timeout(DEFAULT_STALL_TIMEOUT, request.send())
            .await
            .map_err(|_| {
                DurableError::Unavailable(format!(
                    "{}: no response within {:?}",
                    what, DEFAULT_STALL_TIMEOUT
                ))
            })?
            .map_err(|e| transport(what, e))
    }

    fn url_with_path(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn object_api_url(&self, key: &BlobId) -> Url {
        self.url_with_path(&["storage", "v1", "b", &self.bucket, "o", key.as_str()])
    }

    fn upload_api_url(&self, key: &BlobId) -> Url {
        let mut url = self.url_with_path(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key.as_str())
            .append_pair("ifGenerationMatch", "0");
        url
    }

    async fn failure(&self, what: &str, key: &BlobId, response: reqwest::Response) -> DurableError {
        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        DurableError::Unavailable(format!(
            "{} {}: {} {}",
            what,
            self.object_url(key),
            status.as_u16(),
            message
        ))
    }

    /// Whether object `key` exists
    pub async fn exists(&self, key: &BlobId) -> Result<bool, DurableError> {
        let response = self
            .send(
                "getting object attributes",
                self.client.get(self.object_api_url(key)),
            )
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.failure("getting object attributes for", key, response).await),
        }
    }
}

fn transport(what: &str, err: reqwest::Error) -> DurableError {
    DurableError::Unavailable(format!("{}: {}", what, err))
}

#[async_trait]
impl DurableStore for GcsStore {
    async fn download(&self, key: &BlobId, destination: &Path) -> Result<u64, DurableError> {
        let object_url = self.object_url(key);
        info!(source = %object_url, destination = %destination.display(), "Downloading blob from GCS");

        let mut url = self.object_api_url(key);
        url.query_pairs_mut().append_pair("alt", "media");

        let started_at = Instant::now();
        let response = self
            .send("opening object from GCS", self.client.get(url))
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(DurableError::NotFound(object_url)),
            _ => return Err(self.failure("opening object", key, response).await),
        }

        let body = stall_guarded(response.bytes_stream(), DEFAULT_STALL_TIMEOUT);
        let bytes = write_atomic_stream(body, destination).await?;

        info!(
            source = %object_url,
            destination = %destination.display(),
            bytes = bytes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Downloaded blob from GCS"
        );
        Ok(bytes)
    }

    async fn upload(&self, source: &Path, key: &BlobId) -> Result<UploadOutcome, DurableError> {
        let object_url = self.object_url(key);

        if self.exists(key).await? {
            info!(url = %object_url, "Object already exists in GCS");
            return Ok(UploadOutcome::AlreadyPresent);
        }
        debug!(url = %object_url, "Object not found in GCS");

        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();

        info!(source = %source.display(), destination = %object_url, "Uploading blob to GCS");
        let started_at = Instant::now();
        let request = self
            .client
            .post(self.upload_api_url(key))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::from(file));
        let response = self.send("uploading to GCS", request).await?;

        match response.status() {
            status if status.is_success() => {}
            // ifGenerationMatch=0 lost a race with another writer
            StatusCode::PRECONDITION_FAILED => {
                info!(url = %object_url, "Object created concurrently in GCS");
                return Ok(UploadOutcome::AlreadyPresent);
            }
            _ => return Err(self.failure("uploading", key, response).await),
        }

        info!(
            url = %object_url,
            bytes = length,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Uploaded blob to GCS"
        );
        Ok(UploadOutcome::Uploaded(length))
    }

    fn object_url(&self, key: &BlobId) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    fn name(&self) -> &'static str {
        "gcs"
    }
}
