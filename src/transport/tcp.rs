//! TCP dialer
//!
//! Opens plain TCP tunnel connections.

use super::{AddrMaybeCached, Dialer, SocketOpts, StreamDyn};
use crate::config::ClientConfig;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dialer for plain TCP connections
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a new TCP dialer with default options
    pub fn with_defaults() -> Self {
        TcpDialer {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Create a TCP dialer from client configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        TcpDialer {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: Duration::from_secs(config.connect_timeout),
        }
    }

    /// Connect and return the concrete stream
    pub async fn connect(&self, addr: &AddrMaybeCached) -> Result<TcpStream> {
        let resolved = addr.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .with_context(|| format!("Connection timeout to {}", addr.addr()))?
            .with_context(|| format!("Failed to connect to {}", addr.addr()))?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("TCP connection established to {}", resolved);

        Ok(stream)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &AddrMaybeCached) -> Result<Box<dyn StreamDyn>> {
        let stream = self.connect(addr).await?;
        Ok(Box::new(stream))
    }
}
