//! Configuration types for blobserver

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{BlobError, BlobId, BlobResult, KnownBlob};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Local and durable storage configuration
    pub storage: StorageConfig,
    /// Origin registry and fetch policy
    pub origin: OriginConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Blobs to resolve before serving
    pub preload: Vec<BlobId>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> BlobResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BlobError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| BlobError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the settings that have no usable default
    pub fn validate(&self) -> BlobResult<()> {
        let bucket = self.storage.bucket.as_deref().ok_or_else(|| {
            BlobError::Config("a durable store bucket must be configured (CACHE_BUCKET)".to_string())
        })?;
        DurableLocation::parse(bucket)?;

        if self.origin.stall_timeout_secs == 0 {
            return Err(BlobError::Config(
                "origin.stall_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.origin.max_attempts == 0 {
            return Err(BlobError::Config(
                "origin.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Listen address with an empty host (`:8080`) bound on all interfaces
    pub fn bind_address(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local cache root; a leading `~/` is expanded to the home directory
    pub cache_dir: PathBuf,
    /// Durable store location (`gs://<bucket>` or `file://<dir>`)
    pub bucket: Option<String>,
    /// Base URL of the GCS JSON API
    pub gcs_endpoint: String,
    /// How requests to GCS are authorized
    pub gcs_auth: GcsAuth,
}

/// Credentials used for the GCS JSON API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcsAuth {
    /// Application Default Credentials
    #[default]
    Adc,
    /// No credentials, for emulators and authenticating proxies
    Anonymous,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("~/.cache/blobserver/blobs"),
            bucket: None,
            gcs_endpoint: "https://storage.googleapis.com".to_string(),
            gcs_auth: GcsAuth::Adc,
        }
    }
}

impl StorageConfig {
    /// Cache root with `~/` expanded
    pub fn resolved_cache_dir(&self) -> BlobResult<PathBuf> {
        expand_home(&self.cache_dir)
    }
}

fn expand_home(path: &Path) -> BlobResult<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                BlobError::Config("getting home directory: HOME is not set".to_string())
            })?;
            Ok(PathBuf::from(home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Where durable copies of blobs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableLocation {
    /// Google Cloud Storage bucket
    Gcs { bucket: String },
    /// Directory on a local or mounted filesystem
    Filesystem { root: PathBuf },
}

impl DurableLocation {
    /// Parse a `gs://<bucket>` or `file://<dir>` location
    pub fn parse(value: &str) -> BlobResult<Self> {
        if let Some(bucket) = value.strip_prefix("gs://") {
            let bucket = bucket.trim_end_matches('/');
            if bucket.is_empty() || bucket.contains('/') {
                return Err(BlobError::Config(format!(
                    "invalid GCS bucket url {:?}",
                    value
                )));
            }
            return Ok(DurableLocation::Gcs {
                bucket: bucket.to_string(),
            });
        }
        if let Some(root) = value.strip_prefix("file://") {
            if root.is_empty() {
                return Err(BlobError::Config(format!(
                    "invalid filesystem store url {:?}",
                    value
                )));
            }
            return Ok(DurableLocation::Filesystem {
                root: PathBuf::from(root),
            });
        }
        Err(BlobError::Config(format!(
            "CACHE_BUCKET must be a GCS bucket URL (gs://<bucket>) or a directory (file://<path>), got {:?}",
            value
        )))
    }
}

/// Origin registry and fetch policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Attempts per origin fetch, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts in seconds
    pub retry_delay_secs: u64,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Seconds without any response data before an attempt is abandoned
    pub stall_timeout_secs: u64,
    /// Known blobs and where to fetch them
    pub blobs: Vec<KnownBlob>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_secs: 5,
            connect_timeout_secs: 30,
            stall_timeout_secs: 60,
            blobs: KnownBlob::builtin(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
