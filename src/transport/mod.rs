//! Transport module for udptun
//!
//! This module provides the two collaborators the relay engines are built
//! on: the [`Dialer`] that opens tunnel connections, and the [`PacketConn`]
//! that carries local UDP datagrams.

mod addr;
mod tcp;
mod udp;

pub use addr::AddrMaybeCached;
pub use tcp::TcpDialer;
pub use udp::{FixedTargetConn, PacketConn, SocksUdpConn};

use crate::config::TcpConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring tunnel connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts::from_tcp_config(&TcpConfig::default())
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Opens tunnel connections to the server.
///
/// The relay engines never connect on their own; every outbound tunnel
/// connection goes through this trait.
#[async_trait]
pub trait Dialer: Debug + Send + Sync + 'static {
    /// Connect to the tunnel server
    async fn dial(&self, addr: &AddrMaybeCached) -> Result<Box<dyn StreamDyn>>;
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}
