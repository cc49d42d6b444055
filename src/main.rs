//! Udptun - UDP over TCP tunnel
//!
//! This is the main entry point for the udptun application.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use udptun::config::load_config;
use udptun::relay::{run_client, run_server};

/// Which side of the tunnel to run
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Role {
    /// Receive local UDP and open tunnel connections
    Client,
    /// Accept tunnel connections and talk to UDP targets
    Server,
}

/// Udptun - carry UDP datagrams over TCP
#[derive(Parser, Debug)]
#[command(name = "udptun")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Side of the tunnel to run
    #[arg(value_enum)]
    role: Role,

    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let config = load_config(&args.config)?;

    info!("Udptun v{}", udptun::VERSION);
    info!("Configuration loaded from: {:?}", args.config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match args.role {
        Role::Client => {
            let client = config
                .client
                .context("Configuration has no [client] section")?;
            info!("Tunnel server: {}", client.remote_addr);
            run_client(client, shutdown_rx).await
        }
        Role::Server => {
            let server = config
                .server
                .context("Configuration has no [server] section")?;
            info!("Tunnel listener: {}", server.listen_addr);
            run_server(server, shutdown_rx).await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to setup SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on command-line flags
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
