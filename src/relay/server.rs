//! Server relay engine
//!
//! Every accepted tunnel connection becomes a flow: the handshake names the
//! real UDP target, a fresh ephemeral UDP socket is connected to it, and two
//! tasks pump frames to datagrams and datagrams to frames until either side
//! ends.

use crate::config::ServerConfig;
use crate::error::TunnelError;
use crate::helper::{
    duration_from_secs, first_error, DEFAULT_HANDSHAKE_TIMEOUT_SECS, MAX_DATAGRAM_SIZE,
};
use crate::protocol::{FrameReader, FrameWriter, TunnelConn};
use crate::transport::SocketOpts;
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// TCP-facing side of the tunnel
#[derive(Debug, Clone)]
pub struct ServerRelay {
    /// Socket options applied to accepted connections
    socket_opts: SocketOpts,
    /// Time allowed for the handshake
    handshake_timeout: Duration,
}

impl Default for ServerRelay {
    fn default() -> Self {
        ServerRelay {
            socket_opts: SocketOpts::default(),
            handshake_timeout: duration_from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

impl ServerRelay {
    /// Create a server relay with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server relay from configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        ServerRelay {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            handshake_timeout: duration_from_secs(config.handshake_timeout),
        }
    }

    /// Accept tunnel connections until accepting fails.
    ///
    /// Flow failures are logged and never end the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Accepting tunnel connections on {}",
            listener.local_addr().context("Listener has no local address")?
        );

        loop {
            let (stream, from) = listener
                .accept()
                .await
                .context("Failed to accept tunnel connection")?;

            if let Err(e) = self.socket_opts.apply(&stream) {
                warn!("Failed to apply socket options: {}", e);
            }
            debug!("Accepted tunnel connection from {}", from);

            let handshake_timeout = self.handshake_timeout;
            tokio::spawn(async move {
                match run_flow(stream, handshake_timeout).await {
                    Ok(()) => debug!("Flow from {} closed", from),
                    Err(e) => warn!("Flow from {} failed: {:#}", from, e),
                }
            });
        }
    }
}

/// Relay one accepted tunnel connection to its UDP target.
///
/// Both the stream and the UDP socket are closed when this returns.
pub async fn run_flow<S>(stream: S, handshake_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tunnel, target) = tokio::time::timeout(handshake_timeout, TunnelConn::accept(stream))
        .await
        .map_err(|_| {
            TunnelError::Handshake(format!("no handshake within {:?}", handshake_timeout))
        })?
        .context("Failed to read handshake")?;

    let target_addr = target.resolve().await?;
    let socket = bind_ephemeral(target_addr)
        .await
        .with_context(|| format!("Failed to open UDP socket for {}", target))?;
    let socket = Arc::new(socket);

    debug!(
        "Flow relaying to {} via {}",
        target,
        socket.local_addr().context("UDP socket has no local address")?
    );

    let (reader, writer) = tunnel.into_split();
    let cancel = CancellationToken::new();

    let down_task = tokio::spawn(downlink(reader, socket.clone(), cancel.clone()));
    let up = uplink(writer, socket, cancel.clone()).await;
    let down = down_task
        .await
        .unwrap_or_else(|e| Err(anyhow!("Downlink task failed: {}", e)));

    first_error(up, down)
}

/// Bind an unspecified-address socket of the target's family and connect it
async fn bind_ephemeral(target: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(target).await?;
    Ok(socket)
}

/// Tunnel frames to datagrams for the target
async fn downlink<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    let result = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            frame = reader.read_frame(&mut buf) => frame,
        };

        match frame {
            Ok(Some(len)) => {
                if let Err(e) = socket.send(&buf[..len]).await {
                    break Err(anyhow::Error::new(e).context("Failed to send datagram to target"));
                }
                trace!("Sent {} bytes to target", len);
            }
            Ok(None) => {
                debug!("Tunnel closed by client");
                break Ok(());
            }
            Err(e) => break Err(anyhow::Error::new(e).context("Failed to read frame from tunnel")),
        }
    };

    cancel.cancel();
    result
}

/// Datagrams from the target to tunnel frames
async fn uplink<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    let result = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            received = socket.recv(&mut buf) => received,
        };

        let len = match received {
            Ok(len) => len,
            Err(e) => {
                break Err(anyhow::Error::new(e).context("Failed to receive datagram from target"))
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            written = writer.write_frame(&buf[..len]) => {
                if let Err(e) = written {
                    break Err(anyhow::Error::new(e).context("Failed to write frame to tunnel"));
                }
            }
        }
    };

    cancel.cancel();
    if let Err(e) = writer.shutdown().await {
        trace!("Tunnel shutdown: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_handshake, Endpoint};
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::time::timeout;

    async fn udp_target() -> (UdpSocket, Endpoint) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(socket.local_addr().unwrap());
        (socket, endpoint)
    }

    #[test]
    fn test_server_relay_defaults() {
        let relay = ServerRelay::new();
        assert_eq!(relay.handshake_timeout, Duration::from_secs(10));
        assert!(relay.socket_opts.nodelay);

        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            handshake_timeout: 2,
            tcp: Default::default(),
        };
        let relay = ServerRelay::from_config(&config);
        assert_eq!(relay.handshake_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_flow_relays_both_directions() {
        let (target_socket, target) = udp_target().await;
        let (client_side, server_side) = duplex(256 * 1024);
        let flow = tokio::spawn(run_flow(server_side, Duration::from_secs(5)));

        let mut tunnel = TunnelConn::initiate(client_side, &target).await.unwrap();
        tunnel.write_frame(b"ping").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, flow_addr) = timeout(Duration::from_secs(5), target_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"ping");

        target_socket.send_to(b"pong", flow_addr).await.unwrap();
        let n = timeout(Duration::from_secs(5), tunnel.read_frame(&mut buf))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"pong");

        // Closing the tunnel ends the flow cleanly
        drop(tunnel);
        let result = timeout(Duration::from_secs(5), flow).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_flow_ignores_other_senders() {
        let (target_socket, target) = udp_target().await;
        let (client_side, server_side) = duplex(64 * 1024);
        tokio::spawn(run_flow(server_side, Duration::from_secs(5)));

        let mut tunnel = TunnelConn::initiate(client_side, &target).await.unwrap();
        tunnel.write_frame(b"hello").await.unwrap();
        let mut buf = [0u8; 64];
        let (_, flow_addr) = target_socket.recv_from(&mut buf).await.unwrap();

        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stranger.send_to(b"spoof", flow_addr).await.unwrap();
        target_socket.send_to(b"real", flow_addr).await.unwrap();

        let n = timeout(Duration::from_secs(5), tunnel.read_frame(&mut buf))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"real");
    }

    #[tokio::test]
    async fn test_flow_rejects_malformed_handshake() {
        let (mut client_side, server_side) = duplex(1024);
        client_side.write_all(&[0x07, 1, 2, 3]).await.unwrap();

        let result = run_flow(server_side, Duration::from_secs(5)).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::MalformedAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_flow_handshake_timeout() {
        let (_client_side, server_side) = duplex(1024);
        let result = run_flow(server_side, Duration::from_millis(100)).await;
        assert!(matches!(
            result.unwrap_err().downcast_ref::<TunnelError>(),
            Some(TunnelError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_flow_short_buffer_is_reported() {
        let (_target_socket, target) = udp_target().await;
        let (mut client_side, server_side) = duplex(256 * 1024);
        let flow = tokio::spawn(run_flow(server_side, Duration::from_secs(5)));

        write_handshake(&mut client_side, &target).await.unwrap();
        // A frame longer than any datagram cannot be relayed
        client_side.write_all(&[0xFF, 0xFF]).await.unwrap();
        client_side.write_all(&vec![0u8; 0xFFFF]).await.unwrap();

        let result = timeout(Duration::from_secs(5), flow).await.unwrap().unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_accepts_connections() {
        let (target_socket, target) = udp_target().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { ServerRelay::new().serve(listener).await });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut tunnel = TunnelConn::initiate(stream, &target).await.unwrap();
        tunnel.write_frame(b"over-tcp").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(5), target_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"over-tcp");
    }
}
