//! Durable store backed by a directory (a mounted bucket or shared volume)

use async_trait::async_trait;
use blobserver_core::{BlobId, DurableError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use super::{DurableStore, UploadOutcome};
use crate::atomic::write_atomic;

/// Directory holding one file per blob, named by identifier
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of object `key`
    pub fn object_path(&self, key: &BlobId) -> PathBuf {
        self.root.join(key.as_str())
    }
}

#[async_trait]
impl DurableStore for FsStore {
    async fn download(&self, key: &BlobId, destination: &Path) -> Result<u64, DurableError> {
        let source = self.object_path(key);
        let mut file = match tokio::fs::File::open(&source).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DurableError::NotFound(self.object_url(key)))
            }
            Err(e) => return Err(e.into()),
        };

        let started_at = Instant::now();
        let bytes = write_atomic(&mut file, destination).await?;

        info!(
            source = %source.display(),
            destination = %destination.display(),
            bytes = bytes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Copied blob from durable directory"
        );
        Ok(bytes)
    }

    async fn upload(&self, source: &Path, key: &BlobId) -> Result<UploadOutcome, DurableError> {
        let target = self.object_path(key);
        if tokio::fs::try_exists(&target).await? {
            info!(path = %target.display(), "Object already exists in durable directory");
            return Ok(UploadOutcome::AlreadyPresent);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let mut file = tokio::fs::File::open(source).await?;
        let bytes = write_atomic(&mut file, &target).await?;

        info!(path = %target.display(), bytes = bytes, "Copied blob to durable directory");
        Ok(UploadOutcome::Uploaded(bytes))
    }

    fn object_url(&self, key: &BlobId) -> String {
        format!("file://{}", self.object_path(key).display())
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let root = tempdir().unwrap();
        let local = tempdir().unwrap();
        let store = FsStore::new(root.path());
        let key = BlobId::parse("abc").unwrap();

        let err = store
            .download(&key, &local.path().join("abc"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!local.path().join("abc").exists());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let root = tempdir().unwrap();
        let local = tempdir().unwrap();
        let store = FsStore::new(root.path().join("bucket"));
        let key = BlobId::parse("abc").unwrap();

        let source = local.path().join("source");
        std::fs::write(&source, b"weights").unwrap();

        assert_eq!(
            store.upload(&source, &key).await.unwrap(),
            UploadOutcome::Uploaded(7)
        );
        assert_eq!(
            store.upload(&source, &key).await.unwrap(),
            UploadOutcome::AlreadyPresent
        );

        let dest = local.path().join("abc");
        assert_eq!(store.download(&key, &dest).await.unwrap(), 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn test_upload_skips_existing_object() {
        let root = tempdir().unwrap();
        let local = tempdir().unwrap();
        let store = FsStore::new(root.path());
        let key = BlobId::parse("abc").unwrap();
        std::fs::write(store.object_path(&key), b"first writer").unwrap();

        let source = local.path().join("source");
        std::fs::write(&source, b"second writer").unwrap();

        store.upload(&source, &key).await.unwrap();
        assert_eq!(std::fs::read(store.object_path(&key)).unwrap(), b"first writer");
    }
}
