//! HTTP download with bounded retry

use blobserver_core::{BlobError, BlobResult, OriginConfig};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::atomic::write_atomic_stream;

/// Longest wait for response headers or the next body chunk
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Fail a byte stream that produces nothing for `stall`
///
/// Each chunk gets the full window, so large transfers are not cut short as
/// long as data keeps arriving.
pub fn stall_guarded<S, E>(stream: S, stall: Duration) -> impl Stream<Item = io::Result<Bytes>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    futures::stream::unfold(Box::pin(stream), move |mut stream| async move {
        match tokio::time::timeout(stall, stream.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), stream)),
            Ok(Some(Err(e))) => Some((Err(io::Error::new(io::ErrorKind::Other, e)), stream)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received for {:?}", stall),
                )),
                stream,
            )),
        }
    })
}

/// Downloads a URL to a file, retrying the whole transfer with a fixed delay
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
    stall_timeout: Duration,
}

impl RetryingFetcher {
    /// Create a fetcher around an existing client
    ///
    /// `max_attempts` counts the first attempt and is clamped to at least one.
    pub fn new(client: reqwest::Client, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            retry_delay,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// Abandon an attempt after `stall` without response data
    pub fn with_stall_timeout(mut self, stall: Duration) -> Self {
        self.stall_timeout = stall;
        self
    }

    /// Create a fetcher from the origin configuration
    pub fn from_config(config: &OriginConfig) -> BlobResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BlobError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::new(
            client,
            config.max_attempts,
            Duration::from_secs(config.retry_delay_secs),
        )
        .with_stall_timeout(Duration::from_secs(config.stall_timeout_secs)))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Download `url` into `destination`, returning the byte count
    ///
    /// Every attempt writes a fresh temporary file, so a failed attempt never
    /// leaves bytes at `destination`. The last attempt's error is returned
    /// once all attempts are used up.
    pub async fn fetch(&self, url: &str, destination: &Path) -> BlobResult<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match self.fetch_once(url, destination).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(err);
            }

            warn!(
                url = %url,
                attempt = attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "Download failed, will retry"
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// A single download attempt
    pub async fn fetch_once(&self, url: &str, destination: &Path) -> BlobResult<u64> {
        info!(url = %url, destination = %destination.display(), "Downloading blob");

        let origin_error = |message: String| BlobError::Origin {
            url: url.to_string(),
            message,
        };

        let started_at = Instant::now();
        let response = tokio::time::timeout(self.stall_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                origin_error(format!("no response headers within {:?}", self.stall_timeout))
            })?
            .map_err(|e| origin_error(format!("doing request: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(origin_error(format!(
                "unexpected status downloading from upstream source: {}",
                response.status()
            )));
        }

        let body = stall_guarded(response.bytes_stream(), self.stall_timeout);
        let bytes = write_atomic_stream(body, destination)
            .await
            .map_err(|e| origin_error(format!("writing {}: {}", destination.display(), e)))?;

        info!(
            url = %url,
            bytes = bytes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Downloaded blob"
        );

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(attempts: u32) -> RetryingFetcher {
        RetryingFetcher::new(reqwest::Client::new(), attempts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob.gguf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"GGUF-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        let n = fetcher(3)
            .fetch(&format!("{}/blob.gguf", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(n, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"GGUF-bytes");
    }

    #[tokio::test]
    async fn test_fetch_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .with_priority(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        fetcher(3).fetch(&server.uri(), &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        let err = fetcher(2).fetch(&server.uri(), &dest).await.unwrap_err();

        match err {
            BlobError::Origin { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_non_ok_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        assert!(fetcher(1).fetch(&server.uri(), &dest).await.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_slow_origin_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        let started_at = Instant::now();
        let err = fetcher(2)
            .with_stall_timeout(Duration::from_millis(100))
            .fetch(&server.uri(), &dest)
            .await
            .unwrap_err();

        assert!(started_at.elapsed() < Duration::from_secs(4));
        match err {
            BlobError::Origin { message, .. } => assert!(message.contains("no response headers")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_stalled_body_is_abandoned() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        let body = futures::stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"first"))])
            .chain(futures::stream::pending());

        let err = write_atomic_stream(stall_guarded(body, Duration::from_millis(50)), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(err.to_string().contains("no data received"));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_attempts_clamped() {
        assert_eq!(fetcher(0).max_attempts(), 1);
        let from_config = RetryingFetcher::from_config(&OriginConfig::default()).unwrap();
        assert_eq!(from_config.max_attempts(), 5);
    }
}
