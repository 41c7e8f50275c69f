//! FenceSync Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Loading and validating the YAML configuration
//! - Building the sync engine (providers, single- and multi-target
//!   configurations, periodic triggers)
//! - Graceful shutdown on SIGTERM/SIGINT, letting in-flight passes finish
//!
//! # Architecture
//!
//! Periodic triggers live inside the engine, so the daemon itself only
//! waits for a shutdown signal. Device arrival and removal are reported to
//! the engine by an embedding host; the daemon has no device notifier.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fencesync_core::config::{Config, LoggingConfig};
use fencesync_sync::engine::SyncEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "fencesyncd", version, about = "FenceSync synchronization daemon")]
struct Args {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Loads the configuration
///
/// An explicit path must exist and parse; the default path falls back to
/// built-in defaults when missing.
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            eprintln!("config error: {err}");
        }
        bail!("configuration has {} error(s)", errors.len());
    }
    Ok(config)
}

/// Installs the global subscriber; `RUST_LOG` overrides `logging.level`
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let engine = SyncEngine::from_config(&config)?;
    engine.start().await;

    for feature in engine.features() {
        info!(feature = %feature.id, state = %feature.state, "Feature status");
    }

    shutdown.cancelled().await;

    engine.shutdown();
    let grace = Duration::from_secs(config.sync.shutdown_grace_secs);
    if !engine.wait_idle(grace).await {
        warn!(
            grace_secs = grace.as_secs(),
            "Passes still running after grace period, exiting anyway"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    if args.check {
        println!("configuration OK");
        return Ok(());
    }

    init_tracing(&config.logging);
    info!("FenceSync daemon starting (fencesyncd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = run(config, shutdown_token).await;

    match &result {
        Ok(()) => info!("FenceSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "FenceSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use fencesync_core::config::ConfigBuilder;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn args_accept_config_path() {
        let args = Args::parse_from(["fencesyncd", "--config", "/etc/fencesync.yaml", "--check"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/fencesync.yaml")));
        assert!(args.check);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        ConfigBuilder::new()
            .logging_level("chatty")
            .build()
            .save(&path)
            .unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("1 error"));
    }

    #[tokio::test]
    async fn run_returns_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        run(Config::default(), token).await.unwrap();
    }
}
