//! blobserver daemon
//!
//! Serves model weight blobs by content hash from a local cache that is
//! backed by a durable object store and the blobs' upstream origins.

use anyhow::Context;
use blobserver_api::create_router;
use blobserver_core::{BlobId, DaemonConfig, LoggingConfig};
use blobserver_store::{open_store, BlobCache, OriginResolver, RetryingFetcher};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// blobserverd - content-addressed pull-through cache for model weights
#[derive(Parser, Debug)]
#[command(name = "blobserverd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "BLOBSERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Local cache directory
    #[arg(long, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Durable store (gs://<bucket> or file://<dir>)
    #[arg(long, env = "CACHE_BUCKET")]
    cache_bucket: Option<String>,

    /// Blob to fetch before serving; may be repeated
    #[arg(long = "preload", value_name = "BLOB_ID")]
    preload: Vec<BlobId>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file (or defaults) and apply command-line overrides
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.storage.cache_dir = cache_dir;
        }
        if let Some(bucket) = self.cache_bucket {
            config.storage.bucket = Some(bucket);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        config.preload.extend(self.preload);

        Ok(config)
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false);

    let result = if config.format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.context("Failed to set subscriber")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging)?;

    info!("Starting blobserver daemon v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    let cache_dir = config.storage.resolved_cache_dir()?;
    let durable = open_store(&config.storage).await?;
    info!(
        store = durable.name(),
        bucket = config.storage.bucket.as_deref().unwrap_or_default(),
        "Using durable store"
    );

    let origins = OriginResolver::new(config.origin.blobs.clone());
    info!(known_blobs = origins.len(), "Loaded origin registry");

    let cache = Arc::new(BlobCache::new(
        cache_dir,
        durable,
        origins,
        RetryingFetcher::from_config(&config.origin)?,
    ));
    cache
        .init()
        .await
        .with_context(|| format!("creating cache directory {}", cache.base_dir().display()))?;

    cache
        .preload(&config.preload)
        .await
        .context("error getting blob")?;

    let router = create_router(Arc::clone(&cache));

    let listen = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {:?}", listen))?;
    info!("serving on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| format!("serving on {:?}", listen))?;

    for job in cache.coordinator().in_flight() {
        info!(blob = %job.blob, job_id = %job.job_id, elapsed_ms = job.elapsed_ms, "Abandoning in-flight download");
    }
    info!(
        pending = cache.pending_uploads(),
        "Shutting down; waiting for durable store uploads"
    );
    cache.wait_for_uploads().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "blobserverd",
            "--listen",
            ":9000",
            "--cache-dir",
            "/srv/blobs",
            "--cache-bucket",
            "gs://model-blobs",
            "--preload",
            "abc",
            "--preload",
            "def",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let config = args.into_config().unwrap();
        assert_eq!(config.server.listen, ":9000");
        assert_eq!(config.server.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.storage.cache_dir, PathBuf::from("/srv/blobs"));
        assert_eq!(config.storage.bucket.as_deref(), Some("gs://model-blobs"));
        assert_eq!(config.preload.len(), 2);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_preload_id_rejected() {
        assert!(Args::try_parse_from(["blobserverd", "--preload", "../x"]).is_err());
    }
}
