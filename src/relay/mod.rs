//! Relay engines
//!
//! The client engine demultiplexes local UDP traffic into per-peer sessions,
//! each owning one tunnel connection. The server engine turns each accepted
//! tunnel connection into a flow bound to a fresh UDP socket.
//!
//! Both sides run two tasks per session or flow (uplink and downlink) that
//! share a cancellation token: whichever ends first cancels the other, and a
//! task that stops because of cancellation reports success.

mod client;
mod server;
mod session;

pub use client::ClientRelay;
pub use server::{run_flow, ServerRelay};
pub use session::{SessionHandle, SessionState, SessionTable};

use crate::config::{ClientConfig, LocalMode, ServerConfig};
use crate::helper::{duration_from_secs, DEFAULT_BUF_SIZE, DEFAULT_IDLE_TIMEOUT_SECS};
use crate::transport::{AddrMaybeCached, FixedTargetConn, PacketConn, SocksUdpConn, TcpDialer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Tunables consumed by the client engine
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Inactivity after which a session is torn down
    pub idle_timeout: Duration,
    /// Per-session queue capacity
    pub queue_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            idle_timeout: duration_from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            queue_capacity: DEFAULT_BUF_SIZE,
        }
    }
}

/// Bind the local UDP socket and run the client relay until shutdown
pub async fn run_client(
    config: ClientConfig,
    mut shutdown_rx: broadcast::Receiver<bool>,
) -> Result<()> {
    let conn: Arc<dyn PacketConn> = match config.mode {
        LocalMode::Fixed => {
            let target = config
                .target_endpoint()
                .context("Fixed mode requires a valid target")?;
            Arc::new(FixedTargetConn::bind(config.listen_addr.as_str(), target).await?)
        }
        LocalMode::Socks => Arc::new(SocksUdpConn::bind(config.listen_addr.as_str()).await?),
    };
    info!("Listening for UDP on {} ({:?} mode)", config.listen_addr, config.mode);

    let relay = ClientRelay::new(
        conn,
        TcpDialer::from_config(&config),
        AddrMaybeCached::new(&config.remote_addr),
        config.relay_options(),
    )?;

    tokio::select! {
        result = relay.run() => result,
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping client");
            Ok(())
        }
    }
}

/// Bind the tunnel listener and run the server relay until shutdown
pub async fn run_server(
    config: ServerConfig,
    mut shutdown_rx: broadcast::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr.as_str())
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;
    let relay = ServerRelay::from_config(&config);

    tokio::select! {
        result = relay.serve(listener) => result,
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping server");
            Ok(())
        }
    }
}
