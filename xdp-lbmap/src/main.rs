//! xdp-lbmap: control plane for the XDP load balancer's forward table.
//!
//! The XDP program redirects packets carrying a fingerprint token to the
//! backend stored for that token in the pinned `forward_params` hash map.
//! This daemon owns the userspace side of that map:
//!   - list:        print every token and its destination
//!   - insert:      upsert one token → address:port rule
//!   - delete:      remove one token
//!   - batchinsert: fill the table with placeholder entries
//!   - serve:       accept rule batches on `POST /rules` (default)

mod codec;
mod config;
mod control;
mod error;
mod map_controller;
mod rules;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use config::{Config, Overrides};
use control::Outcome;
use map_controller::MapController;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "xdp-lbmap",
    about = "Manage the forward table of the XDP load balancer",
    version
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: Overrides,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "starting xdp-lbmap"
    );

    let config = Config::load(cli.config.as_deref(), cli.overrides)
        .context("loading configuration")?;
    info!(
        map = %config.map.display(),
        action = ?config.action,
        "configuration loaded"
    );

    let outcome = control::run(&config, MapController::pinned(), shutdown_signal())
        .await
        .inspect_err(|e| error!("xdp-lbmap failed: {:#}", e))?;

    match outcome {
        Outcome::Listed(entries) => {
            for entry in &entries {
                println!("{}", entry);
            }
            info!(entries = entries.len(), "listed forward table");
        }
        Outcome::BatchInserted | Outcome::Inserted | Outcome::Deleted => {
            info!("map updated");
        }
        Outcome::Served => info!("xdp-lbmap stopped"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Signal Handling
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
