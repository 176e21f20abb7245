//! OAuth2 bearer tokens for the GCS JSON API

use async_trait::async_trait;
use blobserver_core::{BlobError, BlobResult, DurableError};
use std::sync::Arc;
use tracing::info;

/// Scope needed to read and create objects
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Supplies the bearer token attached to each GCS request
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, DurableError>;
}

/// Application Default Credentials
///
/// Looks at `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud user
/// credentials, then the GCE/GKE metadata server. Tokens are cached and
/// refreshed by the provider.
pub struct DefaultCredentials {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    pub async fn discover() -> BlobResult<Self> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| BlobError::Config(format!("finding GCS credentials: {}", e)))?;
        info!("Using application default credentials for GCS");
        Ok(Self { provider })
    }
}

#[async_trait]
impl TokenSource for DefaultCredentials {
    async fn token(&self) -> Result<String, DurableError> {
        let token = self
            .provider
            .token(&[STORAGE_SCOPE])
            .await
            .map_err(|e| DurableError::Unavailable(format!("getting GCS access token: {}", e)))?;
        Ok(token.as_str().to_string())
    }
}

/// A fixed token
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, DurableError> {
        Ok(self.0.clone())
    }
}
