//! aztier — drift detection and upstream synchronization for tiered Azure
//! role/permission classifications.
//!
//! # Usage
//!
//! ```text
//! aztier watch [--root <dir>] [--config <file>]
//! aztier sync  [--root <dir>] [--config <file>]
//! ```
//!
//! `watch` compares the roles/permissions currently in use in the tenant
//! against the local tier files and records drift; `sync` merges the local
//! tier files with the upstream AAT project.

#![deny(clippy::all)]

mod aat;
mod arm;
mod auth;
mod config;
mod error;
mod graph;
mod syncer;
mod tier;
mod watcher;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "aztier",
    version,
    about = "Detect drift and synchronize tiered Azure role classifications",
    long_about = None,
)]
struct Cli {
    /// Project root holding the tier file directories.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to the project configuration file (defaults to <root>/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect in-tenant drift against the local tier files.
    Watch,

    /// Merge the local tier files with the upstream AAT project.
    Sync,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join("config.json"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL ERROR - {e:#}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    info!("Starting aztier v{}", env!("CARGO_PKG_VERSION"));

    let result: Result<()> = match cli.command {
        Commands::Watch => watcher::run(&config, &cli.root).await,
        Commands::Sync => syncer::run(&config, &cli.root).await,
    };

    if let Err(e) = result {
        error!("run failed: {e:#}");
        eprintln!("FATAL ERROR - {e:#}");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
