//! Local blob cache
//!
//! A blob is cached locally iff `<base_dir>/<id>` exists. Files only ever
//! appear there through an atomic rename, so an existing file is complete.

use blobserver_core::{BlobError, BlobId, BlobResult, Tier};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tracing::{debug, info};

use crate::coordinator::DownloadCoordinator;
use crate::durable::DurableStore;
use crate::fetch::RetryingFetcher;
use crate::origin::OriginResolver;
use crate::resolver::TieredResolver;

/// Open handle to a complete local copy of a blob
#[derive(Debug)]
pub struct BlobHandle {
    /// Path of the local file
    pub path: PathBuf,
    /// The opened file
    pub file: File,
    /// Tier the bytes were found in
    pub tier: Tier,
}

impl BlobHandle {
    /// Size of the opened file
    pub async fn size(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }
}

/// Blob cache manager
pub struct BlobCache {
    /// Local cache root
    base_dir: PathBuf,
    /// Resolution pipeline, also owner of background uploads
    resolver: Arc<TieredResolver>,
    /// Single-flight state for misses
    coordinator: DownloadCoordinator,
}

impl BlobCache {
    /// Create a new blob cache
    pub fn new(
        base_dir: PathBuf,
        durable: Arc<dyn DurableStore>,
        origins: OriginResolver,
        fetcher: RetryingFetcher,
    ) -> Self {
        let resolver = Arc::new(TieredResolver::new(durable, origins, fetcher));
        Self {
            base_dir,
            coordinator: DownloadCoordinator::new(Arc::clone(&resolver)),
            resolver,
        }
    }

    /// Create the cache directory if needed
    pub async fn init(&self) -> BlobResult<()> {
        if !tokio::fs::try_exists(&self.base_dir).await? {
            tokio::fs::create_dir_all(&self.base_dir).await?;
            info!(path = %self.base_dir.display(), "Created blob cache directory");
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Local path of blob `id`
    pub fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.base_dir.join(id.as_str())
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    /// Open blob `id`, pulling it through the durable store or the origin
    /// when it is not cached locally
    pub async fn get_blob(&self, id: &BlobId) -> BlobResult<BlobHandle> {
        let path = self.blob_path(id);

        match File::open(&path).await {
            Ok(file) => {
                debug!(blob = %id, "Local cache hit");
                return Ok(BlobHandle {
                    path,
                    file,
                    tier: Tier::Local,
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let resolution = self.coordinator.materialize(id, &path).await?;

        // A successful resolution leaves a complete file at `path`.
        let file = File::open(&path).await.map_err(|e| {
            BlobError::Io(Arc::new(std::io::Error::new(
                e.kind(),
                format!("opening {} after download: {}", path.display(), e),
            )))
        })?;

        Ok(BlobHandle {
            path,
            file,
            tier: resolution.tier,
        })
    }

    /// Resolve each blob in order, stopping at the first failure
    pub async fn preload(&self, ids: &[BlobId]) -> BlobResult<()> {
        for id in ids {
            let handle = self.get_blob(id).await?;
            let size = handle.size().await?;
            info!(blob = %id, path = %handle.path.display(), tier = %handle.tier, size = size, "Preloaded blob");
        }
        Ok(())
    }

    /// Wait for background durable-store uploads to finish
    pub async fn wait_for_uploads(&self) {
        self.resolver.wait_for_uploads().await
    }

    /// Number of background uploads still running
    pub fn pending_uploads(&self) -> usize {
        self.resolver.pending_uploads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::FsStore;
    use std::time::Duration;
    use tempfile::tempdir;

    fn offline_cache(base_dir: PathBuf, durable_root: &Path) -> BlobCache {
        BlobCache::new(
            base_dir,
            Arc::new(FsStore::new(durable_root)),
            OriginResolver::default(),
            RetryingFetcher::new(reqwest::Client::new(), 1, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_init_creates_directory() {
        let root = tempdir().unwrap();
        let cache = offline_cache(root.path().join("a/b/blobs"), root.path());

        cache.init().await.unwrap();
        assert!(cache.base_dir().is_dir());
        cache.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_hit() {
        let root = tempdir().unwrap();
        let cache = offline_cache(root.path().to_path_buf(), &root.path().join("durable"));
        let id = BlobId::parse("cafe").unwrap();
        std::fs::write(cache.blob_path(&id), b"local bytes").unwrap();

        let handle = cache.get_blob(&id).await.unwrap();
        assert_eq!(handle.tier, Tier::Local);
        assert_eq!(handle.size().await.unwrap(), 11);
        assert_eq!(std::fs::read(&handle.path).unwrap(), b"local bytes");
    }

    #[tokio::test]
    async fn test_preload_stops_on_unknown() {
        let root = tempdir().unwrap();
        let cache = offline_cache(root.path().join("blobs"), &root.path().join("durable"));
        cache.init().await.unwrap();
        let known = BlobId::parse("known").unwrap();
        std::fs::write(cache.blob_path(&known), b"x").unwrap();

        cache.preload(&[known.clone()]).await.unwrap();

        let unknown = BlobId::parse("unknown").unwrap();
        let err = cache.preload(&[known, unknown]).await.unwrap_err();
        assert!(matches!(err, BlobError::UnknownBlob(_)));
    }

    #[tokio::test]
    async fn test_unregistered_blob_is_unknown() {
        let root = tempdir().unwrap();
        let cache = offline_cache(root.path().join("blobs"), &root.path().join("durable"));
        cache.init().await.unwrap();
        let id = BlobId::parse("cafe").unwrap();

        let err = cache.get_blob(&id).await.unwrap_err();
        assert!(matches!(err, BlobError::UnknownBlob(_)));
        assert!(!cache.blob_path(&id).exists());
        assert_eq!(cache.pending_uploads(), 0);
    }
}
