//! Test utilities for udptun
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use udptun::protocol::Endpoint;
use udptun::relay::{ClientRelay, RelayOptions, ServerRelay, SessionTable};
use udptun::transport::{AddrMaybeCached, PacketConn, TcpDialer};

/// Upper bound for any single step of a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Spawn a UDP server that sends every datagram back prefixed with `prefix`
pub async fn spawn_udp_echo(prefix: &'static [u8]) -> (Endpoint, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(socket.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(_) => return,
            };
            let mut reply = prefix.to_vec();
            reply.extend_from_slice(&buf[..n]);
            let _ = socket.send_to(&reply, from).await;
        }
    });

    (endpoint, task)
}

/// Spawn a tunnel server on an available port
pub async fn spawn_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move { ServerRelay::new().serve(listener).await });
    addr
}

/// Spawn a client relay over `conn` pointed at `server`.
///
/// Returns the relay's session table.
pub fn spawn_client(
    conn: Arc<dyn PacketConn>,
    server: SocketAddr,
    options: RelayOptions,
) -> SessionTable {
    let relay = ClientRelay::new(
        conn,
        TcpDialer::with_defaults(),
        AddrMaybeCached::from(server),
        options,
    )
    .unwrap();
    let sessions = relay.sessions().clone();
    tokio::spawn(async move { relay.run().await });
    sessions
}

/// Receive one datagram on `socket`, failing the test after `STEP_TIMEOUT`
pub async fn recv_within(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 65536];
    let (n, _) = tokio::time::timeout(STEP_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    buf.truncate(n);
    buf
}

/// Build a SOCKS5 UDP request datagram
pub fn socks_datagram(target: &Endpoint, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0u8, 0, 0];
    datagram.extend_from_slice(&target.encode().unwrap());
    datagram.extend_from_slice(payload);
    datagram
}

/// Poll the session table until it holds `expected` entries
pub async fn wait_for_session_count(sessions: &SessionTable, expected: usize) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while sessions.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count never reached expected value");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_udp_echo_prefixes_reply() {
        let (endpoint, _task) = spawn_udp_echo(b"re:").await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .send_to(b"x", endpoint.resolve().await.unwrap())
            .await
            .unwrap();
        assert_eq!(recv_within(&socket).await, b"re:x");
    }
}
