//! socksveil - Entry Point
//!
//! Runs a SOCKS5 proxy, a tunnel local endpoint or a tunnel server,
//! depending on the configured mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};

use socksveil::{Config, Server, VERSION};

/// socksveil - SOCKS5 proxy with an encrypted tunnel
#[derive(Parser)]
#[command(name = "socksveil")]
#[command(version = VERSION)]
#[command(about = "SOCKS5 proxy with an encrypted stream-cipher tunnel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the configured mode
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load and validate a configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load(&config)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.server.effective_workers())
                .enable_all()
                .build()
                .context("Failed to build Tokio runtime")?;
            runtime.block_on(run(config))
        }
        Commands::Check { config } => {
            let loaded = load(&config)?;
            println!(
                "{:?}: ok (mode {:?}, {} listen address(es))",
                config,
                loaded.server.mode,
                loaded.server.bind_addrs().len()
            );
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config from {:?}", path))
}

async fn run(config: Config) -> Result<()> {
    socksveil::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        mode = ?config.server.mode,
        workers = config.server.effective_workers(),
        "Starting socksveil"
    );

    if config.metrics.enabled {
        socksveil::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let server = Server::from_config(&config)?;
    let addrs = server.start().await.context("Failed to start server")?;
    info!(?addrs, "Server listening");

    shutdown_signal().await;
    info!("Shutdown signal received, closing connections...");
    server.close().await;

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM or SIGQUIT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match (unix_signal(SignalKind::terminate()), unix_signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {},
                    _ = quit.recv() => {},
                }
            }
            _ => {
                warn!("Failed to install SIGTERM/SIGQUIT handlers");
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
