//! Tiered resolution: durable store first, then the origin

use blobserver_core::{BlobError, BlobId, BlobResult, Tier};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::durable::{DurableStore, UploadOutcome};
use crate::fetch::RetryingFetcher;
use crate::origin::OriginResolver;

/// Outcome of resolving one blob into its local path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Tier the bytes came from
    pub tier: Tier,
    /// Bytes written locally (zero when the file was already present)
    pub bytes: u64,
}

/// Populates a local path from the durable store or the origin
pub struct TieredResolver {
    durable: Arc<dyn DurableStore>,
    origins: OriginResolver,
    fetcher: RetryingFetcher,
    uploads: Mutex<Vec<JoinHandle<()>>>,
}

impl TieredResolver {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        origins: OriginResolver,
        fetcher: RetryingFetcher,
    ) -> Self {
        Self {
            durable,
            origins,
            fetcher,
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Make `id` available at `destination`
    ///
    /// A durable miss falls through to the origin; every other durable error
    /// is returned as is. After an origin fetch the blob is copied to the
    /// durable store in the background and the upload outcome does not
    /// affect the result.
    pub async fn resolve(&self, id: &BlobId, destination: &Path) -> BlobResult<Resolution> {
        // A job for the same blob may have finished between the caller's
        // local lookup and this job's admission.
        if tokio::fs::try_exists(destination).await? {
            debug!(blob = %id, "Blob appeared locally before resolution started");
            return Ok(Resolution {
                tier: Tier::Local,
                bytes: 0,
            });
        }

        match self.durable.download(id, destination).await {
            Ok(bytes) => {
                return Ok(Resolution {
                    tier: Tier::Durable,
                    bytes,
                })
            }
            Err(e) if e.is_not_found() => {
                info!(
                    blob = %id,
                    store = self.durable.name(),
                    "Blob not found in durable store; will download from upstream"
                );
            }
            Err(e) => return Err(BlobError::Durable(e)),
        }

        let source = self.origins.resolve(id)?;
        let bytes = self.fetcher.fetch(source, destination).await?;

        self.spawn_upload(id.clone(), destination.to_path_buf());

        Ok(Resolution {
            tier: Tier::Origin,
            bytes,
        })
    }

    fn spawn_upload(&self, id: BlobId, source: PathBuf) {
        let durable = Arc::clone(&self.durable);
        let span = tracing::info_span!("upload", blob = %id);

        let handle = tokio::spawn(
            async move {
                match durable.upload(&source, &id).await {
                    Ok(UploadOutcome::Uploaded(bytes)) => {
                        info!(url = %durable.object_url(&id), bytes = bytes, "Populated durable store")
                    }
                    Ok(UploadOutcome::AlreadyPresent) => {
                        debug!(url = %durable.object_url(&id), "Durable store already populated")
                    }
                    Err(e) => warn!(
                        url = %durable.object_url(&id),
                        error = %e,
                        "Failed to populate durable store"
                    ),
                }
            }
            .instrument(span),
        );

        let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
        uploads.retain(|h| !h.is_finished());
        uploads.push(handle);
    }

    /// Wait for every background upload started so far
    pub async fn wait_for_uploads(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *uploads)
            };
            if pending.is_empty() {
                return;
            }

            debug!(count = pending.len(), "Waiting for durable store uploads");
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Upload task failed");
                }
            }
        }
    }

    /// Number of uploads that have not finished yet
    pub fn pending_uploads(&self) -> usize {
        let uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
        uploads.iter().filter(|h| !h.is_finished()).count()
    }
}
