//! Atomic file publication
//!
//! Bytes are written to a temporary file in the destination's directory and
//! renamed onto the destination only once everything has been written and
//! synced. The rename stays on one filesystem, so readers observe either the
//! previous file or the complete new one. The temporary file is removed on
//! every path that does not end in a successful rename.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

/// Prefix of in-progress files inside a cache directory
pub const TEMP_PREFIX: &str = ".download-";

/// Temporary file bound to the path it will be published at
pub struct AtomicFile {
    file: File,
    temp_path: TempPath,
    destination: PathBuf,
    written: u64,
}

impl AtomicFile {
    /// Create a temporary file next to `destination`
    pub fn create(destination: &Path) -> io::Result<Self> {
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (file, temp_path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?
            .into_parts();

        Ok(Self {
            file: File::from_std(file),
            temp_path,
            destination: destination.to_path_buf(),
            written: 0,
        })
    }

    /// Append a chunk
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Append everything `reader` yields
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let n = tokio::io::copy(reader, &mut self.file).await?;
        self.written += n;
        Ok(n)
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Sync and rename onto the destination
    pub async fn commit(self) -> io::Result<u64> {
        let Self {
            mut file,
            temp_path,
            destination,
            written,
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // A failed persist hands the TempPath back inside the error; dropping
        // it removes the temporary file.
        temp_path.persist(&destination).map_err(|e| e.error)?;

        debug!(path = %destination.display(), bytes = written, "Published file");
        Ok(written)
    }
}

/// Copy `reader` to `destination` atomically, returning the byte count
pub async fn write_atomic<R>(reader: &mut R, destination: &Path) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = AtomicFile::create(destination)?;
    file.copy_from(reader).await?;
    file.commit().await
}

/// Drain a byte stream to `destination` atomically, returning the byte count
pub async fn write_atomic_stream<S, E>(stream: S, destination: &Path) -> io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = AtomicFile::create(destination)?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        file.write_chunk(&chunk).await?;
    }
    file.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn interrupted(prefix: &'static [u8]) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
        stream::iter(vec![
            Ok(Bytes::from_static(prefix)),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
        ])
    }

    #[tokio::test]
    async fn test_write_atomic_publishes() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");

        let mut reader: &[u8] = b"model weights";
        let n = write_atomic(&mut reader, &dest).await.unwrap();

        assert_eq!(n, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"model weights");
        assert_eq!(entries(dir.path()), vec!["blob".to_string()]);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        std::fs::write(&dest, b"old").unwrap();

        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(b"new ")),
            Ok(Bytes::from_static(b"content")),
        ]);
        let n = write_atomic_stream(chunks, &dest).await.unwrap();

        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"new content");
        assert_eq!(entries(dir.path()), vec!["blob".to_string()]);
    }

    #[tokio::test]
    async fn test_interrupted_stream_leaves_nothing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");

        let err = write_atomic_stream(interrupted(b"partial"), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(!dest.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_stream_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        std::fs::write(&dest, b"complete previous content").unwrap();

        write_atomic_stream(interrupted(b"trunc"), &dest)
            .await
            .unwrap_err();

        assert_eq!(std::fs::read(&dest).unwrap(), b"complete previous content");
        assert_eq!(entries(dir.path()), vec!["blob".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_writer_cleans_up() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");

        let mut file = AtomicFile::create(&dest).unwrap();
        file.write_chunk(b"abandoned").await.unwrap();
        assert_eq!(file.written(), 9);
        assert_eq!(entries(dir.path()).len(), 1);

        drop(file);
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("missing").join("blob");

        let mut reader: &[u8] = b"data";
        assert!(write_atomic(&mut reader, &dest).await.is_err());
        assert!(!dest.exists());
    }
}
