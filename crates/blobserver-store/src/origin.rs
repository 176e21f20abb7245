//! Origin registry lookup

use blobserver_core::{BlobError, BlobId, BlobResult, KnownBlob};
use std::collections::HashMap;
use tracing::warn;

/// Maps blob identifiers to the URL they can be fetched from
#[derive(Debug, Clone, Default)]
pub struct OriginResolver {
    sources: HashMap<BlobId, String>,
}

impl OriginResolver {
    /// Build a resolver from registry entries
    ///
    /// When an identifier is registered more than once the last entry wins.
    pub fn new(blobs: impl IntoIterator<Item = KnownBlob>) -> Self {
        let mut sources = HashMap::new();
        for blob in blobs {
            if let Some(previous) = sources.insert(blob.hash.clone(), blob.url) {
                warn!(blob = %blob.hash, previous = %previous, "Duplicate origin entry");
            }
        }
        Self { sources }
    }

    /// Origin URL for `id`
    pub fn resolve(&self, id: &BlobId) -> BlobResult<&str> {
        self.sources
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| BlobError::UnknownBlob(id.to_string()))
    }

    /// Number of registered blobs
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
