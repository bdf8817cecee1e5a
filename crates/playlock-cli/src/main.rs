//! Playlock CLI - Headless DRM Client
//!
//! Features:
//! - License acquisition and renewal against a license server
//! - Asset status checks with remaining license/purchase time
//! - Playback URL resolution for remote and local assets
//! - Stored license inspection and revocation

use clap::{Parser, Subcommand};
use playlock_core::{ClientConfig, DrmClient, FsLicenseStore, HttpLicenseService, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod commands;
mod output;

/// Playlock CLI - DRM license lifecycle toolkit
#[derive(Parser)]
#[command(name = "playlock")]
#[command(version)]
#[command(about = "DRM license acquisition and playback toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Directory holding persisted license material
    #[arg(long, default_value = ".playlock-store")]
    store_dir: PathBuf,

    /// Deadline in seconds for a terminal license event
    #[arg(long, default_value = "30")]
    deadline: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a license for an asset
    Acquire {
        /// Asset URI
        asset: String,

        /// License server URI
        license: String,

        /// Local content path for a downloaded asset
        #[arg(short, long)]
        local: Option<PathBuf>,
    },

    /// Check asset status and remaining license time
    Status {
        /// Asset URI
        asset: String,

        /// License server URI
        license: String,
    },

    /// Resolve a playback URL for a remote asset
    Play {
        /// Asset URI
        asset: String,

        /// License server URI
        license: String,
    },

    /// Resolve a playback URL for a downloaded asset
    PlayLocal {
        /// Asset URI
        asset: String,

        /// License server URI
        license: String,

        /// Local content path
        path: PathBuf,
    },

    /// Remove persisted license material for an asset
    Revoke {
        /// Asset URI
        asset: String,
    },

    /// List persisted licenses in the store directory
    Licenses,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(level).init();

    let config = ClientConfig {
        play_deadline: Duration::from_secs(cli.deadline),
        retry: RetryPolicy::default(),
        ..ClientConfig::default()
    };
    let service = Arc::new(HttpLicenseService::new(config.request_timeout));
    let store = Arc::new(FsLicenseStore::new(&cli.store_dir));
    let client = DrmClient::with_parts(config, service, store.clone());
    tracing::debug!(store = %cli.store_dir.display(), "DRM client ready");

    match cli.command {
        Commands::Acquire {
            asset,
            license,
            local,
        } => {
            commands::acquire(&client, &asset, &license, local, &cli.format).await?;
        }
        Commands::Status { asset, license } => {
            commands::status(&client, &asset, &license, &cli.format).await?;
        }
        Commands::Play { asset, license } => {
            commands::play(&client, &asset, &license).await?;
        }
        Commands::PlayLocal {
            asset,
            license,
            path,
        } => {
            commands::play_local(&client, &asset, &license, &path).await?;
        }
        Commands::Revoke { asset } => {
            commands::revoke(store.as_ref(), &asset).await?;
        }
        Commands::Licenses => {
            commands::licenses(&cli.store_dir)?;
        }
    }

    Ok(())
}
