//! Local UDP transport
//!
//! A [`PacketConn`] hands the client engine each local datagram together with
//! the endpoint it should be tunnelled to and the peer that sent it, and
//! writes replies back to that peer. Any per-packet addressing convention is
//! applied and stripped here.

use crate::protocol::Endpoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{trace, warn};

/// SOCKS5 UDP request header: RSV(2) + FRAG(1), before the address
const SOCKS_UDP_PREFIX_LEN: usize = 3;

/// Local datagram source and sink
#[async_trait]
pub trait PacketConn: Send + Sync + 'static {
    /// Receive one datagram payload into `buf`.
    ///
    /// Returns the payload length, the endpoint it is destined for and the
    /// local peer that sent it.
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint, SocketAddr)>;

    /// Send a reply payload that came from `target` back to `peer`
    async fn write_packet(
        &self,
        payload: &[u8],
        target: &Endpoint,
        peer: SocketAddr,
    ) -> io::Result<usize>;
}

/// Forwards every local datagram to one fixed target
#[derive(Debug)]
pub struct FixedTargetConn {
    socket: UdpSocket,
    target: Endpoint,
}

impl FixedTargetConn {
    /// Wrap an already bound socket
    pub fn new(socket: UdpSocket, target: Endpoint) -> Self {
        FixedTargetConn { socket, target }
    }

    /// Bind a socket on `addr`
    pub async fn bind<A: ToSocketAddrs>(addr: A, target: Endpoint) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .context("Failed to bind local UDP socket")?;
        Ok(Self::new(socket, target))
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl PacketConn for FixedTargetConn {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint, SocketAddr)> {
        let (len, peer) = self.socket.recv_from(buf).await?;
        Ok((len, self.target.clone(), peer))
    }

    async fn write_packet(
        &self,
        payload: &[u8],
        _target: &Endpoint,
        peer: SocketAddr,
    ) -> io::Result<usize> {
        self.socket.send_to(payload, peer).await
    }
}

/// Reads and writes datagrams carrying a SOCKS5 UDP request header
///
/// ```text
/// +-----+------+------+----------+----------+----------+
/// | RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +-----+------+------+----------+----------+----------+
/// |  2  |  1   |  1   | Variable |    2     | Variable |
/// +-----+------+------+----------+----------+----------+
/// ```
#[derive(Debug)]
pub struct SocksUdpConn {
    socket: UdpSocket,
}

impl SocksUdpConn {
    /// Wrap an already bound socket
    pub fn new(socket: UdpSocket) -> Self {
        SocksUdpConn { socket }
    }

    /// Bind a socket on `addr`
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .context("Failed to bind local UDP socket")?;
        Ok(Self::new(socket))
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Split a SOCKS5 UDP datagram into (header length, target).
fn parse_socks_header(datagram: &[u8]) -> std::result::Result<(usize, Endpoint), String> {
    if datagram.len() < SOCKS_UDP_PREFIX_LEN {
        return Err(format!("datagram too short: {} bytes", datagram.len()));
    }

    let mut buf = datagram;
    let rsv = buf.get_u16();
    if rsv != 0 {
        return Err(format!("invalid RSV field: {}", rsv));
    }
    let frag = buf.get_u8();
    if frag != 0 {
        return Err(format!("fragmented datagram (FRAG={})", frag));
    }

    let target = Endpoint::decode(&mut buf).map_err(|e| e.to_string())?;
    Ok((datagram.len() - buf.len(), target))
}

#[async_trait]
impl PacketConn for SocksUdpConn {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint, SocketAddr)> {
        loop {
            let (len, peer) = self.socket.recv_from(buf).await?;
            match parse_socks_header(&buf[..len]) {
                Ok((header_len, target)) => {
                    buf.copy_within(header_len..len, 0);
                    trace!("SOCKS UDP datagram from {} for {}", peer, target);
                    return Ok((len - header_len, target, peer));
                }
                Err(e) => {
                    warn!("Dropping SOCKS UDP datagram from {}: {}", peer, e);
                }
            }
        }
    }

    async fn write_packet(
        &self,
        payload: &[u8],
        target: &Endpoint,
        peer: SocketAddr,
    ) -> io::Result<usize> {
        let mut buf =
            BytesMut::with_capacity(SOCKS_UDP_PREFIX_LEN + target.encoded_len() + payload.len());
        buf.put_u16(0);
        buf.put_u8(0);
        target
            .encode_into(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        buf.put_slice(payload);

        self.socket.send_to(&buf, peer).await?;
        Ok(payload.len())
    }
}
