//! blobserver CLI
//!
//! Command-line client that downloads blobs from a running blobserver.

mod commands;

use blobserver_core::BlobId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// blobctl - download model weight blobs from a blobserver
#[derive(Parser, Debug)]
#[command(name = "blobctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the blobserver
    #[arg(
        long,
        env = "BLOBSERVER",
        default_value = "http://localhost:8080",
        global = true
    )]
    server: String,

    /// Attempts per download, including the first
    #[arg(long, default_value_t = 5, global = true)]
    attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 5, global = true)]
    retry_delay: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a single blob
    Get {
        /// Blob ID (content hash)
        blob: BlobId,

        /// Output path (defaults to the blob ID in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download the chunks of a split model
    Chunks {
        /// Chunk blob IDs in order, comma separated
        #[arg(value_delimiter = ',', required = true)]
        blobs: Vec<BlobId>,

        /// Path prefix for the chunk files (defaults to <tmp>/model)
        #[arg(long)]
        base: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::BlobClient::new(
        &cli.server,
        cli.attempts,
        Duration::from_secs(cli.retry_delay),
    )?;

    match cli.command {
        Commands::Get { blob, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(blob.as_str()));
            commands::get(&client, &blob, &output).await?;
        }
        Commands::Chunks { blobs, base } => {
            let base = base.unwrap_or_else(|| std::env::temp_dir().join("model"));
            commands::chunks(&client, &blobs, &base).await?;
        }
    }

    Ok(())
}
