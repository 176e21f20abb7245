//! Durable object store tier
//!
//! Objects are keyed by blob identifier. A missing object is reported as
//! [`DurableError::NotFound`] so the caller can fall through to the origin;
//! any other error is a real failure.

mod credentials;
mod filesystem;
mod gcs;

pub use credentials::{DefaultCredentials, StaticToken, TokenSource, STORAGE_SCOPE};
pub use filesystem::FsStore;
pub use gcs::GcsStore;

use async_trait::async_trait;
use blobserver_core::{
    BlobError, BlobId, BlobResult, DurableError, DurableLocation, GcsAuth, StorageConfig,
};
use std::path::Path;
use std::sync::Arc;

/// Result of an existence-checked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The object was written
    Uploaded(u64),
    /// The object was already present and left untouched
    AlreadyPresent,
}

/// Remote store holding one object per blob
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Download object `key` to `destination` atomically
    async fn download(&self, key: &BlobId, destination: &Path) -> Result<u64, DurableError>;

    /// Upload `source` as object `key` unless it already exists
    async fn upload(&self, source: &Path, key: &BlobId) -> Result<UploadOutcome, DurableError>;

    /// Human-readable location of `key`, used in logs
    fn object_url(&self, key: &BlobId) -> String;

    /// Backend name
    fn name(&self) -> &'static str;
}

/// Open the store described by the storage configuration
///
/// GCS credentials are looked up here so that a host without any fails at
/// startup rather than on the first cache miss.
pub async fn open_store(config: &StorageConfig) -> BlobResult<Arc<dyn DurableStore>> {
    let bucket = config.bucket.as_deref().ok_or_else(|| {
        BlobError::Config("no durable store bucket configured".to_string())
    })?;

    let store: Arc<dyn DurableStore> = match DurableLocation::parse(bucket)? {
        DurableLocation::Gcs { bucket } => {
            let store = GcsStore::new(reqwest::Client::new(), &config.gcs_endpoint, bucket)?;
            match config.gcs_auth {
                GcsAuth::Adc => Arc::new(
                    store.with_credentials(Arc::new(DefaultCredentials::discover().await?)),
                ),
                GcsAuth::Anonymous => Arc::new(store),
            }
        }
        DurableLocation::Filesystem { root } => Arc::new(FsStore::new(root)),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_by_scheme() {
        let mut config = StorageConfig {
            bucket: Some("gs://model-blobs".to_string()),
            gcs_auth: GcsAuth::Anonymous,
            ..StorageConfig::default()
        };
        assert_eq!(open_store(&config).await.unwrap().name(), "gcs");

        config.bucket = Some("file:///tmp/blobs".to_string());
        assert_eq!(open_store(&config).await.unwrap().name(), "filesystem");

        config.bucket = Some("s3://nope".to_string());
        assert!(open_store(&config).await.is_err());

        config.bucket = None;
        assert!(open_store(&config).await.is_err());
    }
}
