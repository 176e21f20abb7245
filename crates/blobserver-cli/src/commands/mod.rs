//! CLI commands implementation

use anyhow::{Context, Result};
use blobserver_core::BlobId;
use blobserver_store::RetryingFetcher;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client for downloading blobs from a blobserver
pub struct BlobClient {
    base_url: String,
    fetcher: RetryingFetcher,
}

impl BlobClient {
    pub fn new(base_url: &str, max_attempts: u32, retry_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher: RetryingFetcher::new(client, max_attempts, retry_delay),
        })
    }

    pub fn url(&self, blob: &BlobId) -> String {
        format!("{}/{}", self.base_url, blob)
    }

    /// Download `blob` to `destination`, returning the byte count
    pub async fn download(&self, blob: &BlobId, destination: &Path) -> Result<u64> {
        let url = self.url(blob);
        self.fetcher
            .fetch(&url, destination)
            .await
            .with_context(|| format!("downloading {:?}", url))
    }
}

/// Path of chunk `index` (zero-based) of a model split into `total` files
///
/// The numbering follows the `-00001-of-00003.gguf` convention llama.cpp
/// expects for split models.
pub fn chunk_path(base: &Path, index: usize, total: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("-{:05}-of-{:05}.gguf", index + 1, total));
    PathBuf::from(name)
}

/// Download a single blob
pub async fn get(client: &BlobClient, blob: &BlobId, output: &Path) -> Result<()> {
    let bytes = client.download(blob, output).await?;
    println!("Downloaded {} ({} bytes) to {}", blob, bytes, output.display());
    Ok(())
}

/// Download the chunks of a split model in order
///
/// Prints the path of the first chunk, which is the one to hand to the
/// model server.
pub async fn chunks(client: &BlobClient, blobs: &[BlobId], base: &Path) -> Result<Vec<PathBuf>> {
    let paths = download_chunks(client, blobs, base).await?;
    if let Some(first) = paths.first() {
        println!("{}", first.display());
    }
    Ok(paths)
}

async fn download_chunks(client: &BlobClient, blobs: &[BlobId], base: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(blobs.len());
    for (index, blob) in blobs.iter().enumerate() {
        let path = chunk_path(base, index, blobs.len());
        client
            .download(blob, &path)
            .await
            .with_context(|| format!("downloading chunk {} of {}", index + 1, blobs.len()))?;
        paths.push(path);
    }
    Ok(paths)
}
