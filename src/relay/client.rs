//! Client relay engine
//!
//! A single ingress loop reads local datagrams and routes each one to the
//! session of the peer that sent it, creating the session on first contact.
//! Every session dials its own tunnel connection, sends the handshake, then
//! runs an uplink task (queue to tunnel) and a downlink task (tunnel to
//! peer) until one of them ends.

use super::session::{SessionHandle, SessionState, SessionTable};
use super::RelayOptions;
use crate::error::TunnelError;
use crate::helper::{first_error, MAX_DATAGRAM_SIZE};
use crate::protocol::{Endpoint, FrameReader, FrameWriter, TunnelConn};
use crate::transport::{AddrMaybeCached, Dialer, PacketConn};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Ingress buffer: a full UDP datagram plus room for a local header
const INGRESS_BUF_SIZE: usize = 65536;

/// UDP-facing side of the tunnel
pub struct ClientRelay<D: Dialer> {
    /// Local datagram source and sink
    conn: Arc<dyn PacketConn>,
    /// Opens tunnel connections
    dialer: Arc<D>,
    /// Tunnel server address
    server: AddrMaybeCached,
    /// Idle timeout and queue capacity
    options: RelayOptions,
    /// Live sessions keyed by peer address
    sessions: SessionTable,
    /// Source of session ids
    next_id: AtomicU64,
}

impl<D: Dialer> ClientRelay<D> {
    /// Create a new client relay.
    ///
    /// Fails with `TunnelError::Config` when the queue capacity is zero.
    pub fn new(
        conn: Arc<dyn PacketConn>,
        dialer: D,
        server: AddrMaybeCached,
        options: RelayOptions,
    ) -> std::result::Result<Self, TunnelError> {
        if options.queue_capacity == 0 {
            return Err(TunnelError::Config("queue capacity must be greater than 0".to_string()));
        }

        Ok(ClientRelay {
            conn,
            dialer: Arc::new(dialer),
            server,
            options,
            sessions: SessionTable::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// The session table
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Run the ingress loop.
    ///
    /// Only a failure to read from the local transport ends the loop; session
    /// failures stay inside their session.
    pub async fn run(&self) -> Result<()> {
        info!("Relaying local UDP traffic through {}", self.server.addr());

        let mut buf = vec![0u8; INGRESS_BUF_SIZE];
        loop {
            let (len, target, peer) = self
                .conn
                .read_packet(&mut buf)
                .await
                .context("Failed to read local UDP packet")?;
            self.dispatch(&buf[..len], target, peer).await;
        }
    }

    /// Route one datagram to its peer's session, never blocking on the queue
    async fn dispatch(&self, payload: &[u8], target: Endpoint, peer: SocketAddr) {
        if payload.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Dropping {} byte datagram from {}: {}",
                payload.len(),
                peer,
                TunnelError::PacketTooLarge(payload.len())
            );
            return;
        }

        let key = peer.to_string();
        let handle = match self.sessions.get(&key).await {
            Some(handle) => handle,
            None => self.start_session(key, target, peer).await,
        };

        match handle.try_enqueue(Bytes::copy_from_slice(payload)) {
            Ok(()) => trace!("Queued {} bytes for session {}", payload.len(), handle.key()),
            Err(e @ TunnelError::QueueOverflow(_)) => warn!("Dropping datagram: {}", e),
            Err(e) => debug!("Dropping datagram: {}", e),
        }
    }

    async fn start_session(
        &self,
        key: String,
        target: Endpoint,
        peer: SocketAddr,
    ) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, queue) = SessionHandle::new(id, key.clone(), self.options.queue_capacity);
        self.sessions.set(key, handle.clone()).await;

        debug!("New session {} for {} -> {}", id, peer, target);

        let session = Session {
            handle: handle.clone(),
            target,
            peer,
            queue,
            dialer: self.dialer.clone(),
            server: self.server.clone(),
            conn: self.conn.clone(),
            sessions: self.sessions.clone(),
            idle_timeout: self.options.idle_timeout,
        };
        tokio::spawn(session.run());

        handle
    }
}

/// Everything one session task owns
struct Session<D: Dialer> {
    handle: SessionHandle,
    target: Endpoint,
    peer: SocketAddr,
    queue: mpsc::Receiver<Bytes>,
    dialer: Arc<D>,
    server: AddrMaybeCached,
    conn: Arc<dyn PacketConn>,
    sessions: SessionTable,
    idle_timeout: Duration,
}

impl<D: Dialer> Session<D> {
    async fn run(self) -> Result<()> {
        let handle = self.handle.clone();
        let sessions = self.sessions.clone();

        let result = self.relay().await;

        handle.set_state(SessionState::Closed);
        sessions.delete(handle.key()).await;

        match &result {
            Ok(()) => debug!("Session {} for {} closed", handle.id(), handle.key()),
            Err(e) => warn!("Session {} for {} failed: {:#}", handle.id(), handle.key(), e),
        }
        result
    }

    async fn relay(self) -> Result<()> {
        let Session {
            handle,
            target,
            peer,
            queue,
            dialer,
            server,
            conn,
            idle_timeout,
            ..
        } = self;

        handle.set_state(SessionState::Dialing);
        let stream = match dialer.dial(&server).await {
            Ok(stream) => stream,
            Err(e) => {
                // Re-resolve on the next session
                server.clear_cache().await;
                return Err(TunnelError::Dial(format!("{}: {:#}", server.addr(), e)).into());
            }
        };

        handle.set_state(SessionState::Handshaking);
        let tunnel = TunnelConn::initiate(stream, &target)
            .await
            .context("Failed to send handshake")?;

        handle.set_state(SessionState::Relaying);
        debug!("Session {} relaying {} <-> {}", handle.id(), peer, target);

        let (reader, writer) = tunnel.into_split();
        let cancel = CancellationToken::new();

        let down_task = tokio::spawn(downlink(reader, conn, target, peer, cancel.clone()));
        let up = uplink(writer, queue, idle_timeout, cancel.clone()).await;
        let down = down_task
            .await
            .unwrap_or_else(|e| Err(anyhow!("Downlink task failed: {}", e)));

        first_error(up, down)
    }
}

/// Move queued payloads onto the tunnel until the queue closes, the session
/// idles out, a write fails or the downlink cancels.
async fn uplink<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut queue: mpsc::Receiver<Bytes>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let result = loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            payload = queue.recv() => match payload {
                Some(payload) => payload,
                None => break Ok(()),
            },
            _ = tokio::time::sleep(idle_timeout) => {
                debug!("Session idle for {:?}, closing", idle_timeout);
                break Ok(());
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            written = writer.write_frame(&payload) => {
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

/// Deliver tunnel frames back to the local peer until the tunnel closes, a
/// read fails or the uplink cancels.
async fn downlink<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    conn: Arc<dyn PacketConn>,
    target: Endpoint,
    peer: SocketAddr,
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
                if let Err(e) = conn.write_packet(&buf[..len], &target, peer).await {
                    warn!("Failed to deliver {} bytes to {}: {}", len, peer, e);
                }
            }
            Ok(None) => {
                debug!("Tunnel closed by server for {}", peer);
                break Ok(());
            }
            Err(e) => break Err(anyhow::Error::new(e).context("Failed to read frame from tunnel")),
        }
    };

    cancel.cancel();
    result
}
