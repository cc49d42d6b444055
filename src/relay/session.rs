//! Client session table
//!
//! Maps a local peer's canonical address to the record of its live session.
//! Entries are inserted by the ingress task and removed only by the session
//! task itself when it terminates.

use crate::error::TunnelError;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

/// Lifecycle of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, tasks not started yet
    New = 0,
    /// Connecting to the tunnel server
    Dialing = 1,
    /// Sending the handshake address
    Handshaking = 2,
    /// Pumping datagrams in both directions
    Relaying = 3,
    /// Terminated; the entry is gone or about to be
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::New,
            1 => SessionState::Dialing,
            2 => SessionState::Handshaking,
            3 => SessionState::Relaying,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::New => write!(f, "NEW"),
            SessionState::Dialing => write!(f, "DIALING"),
            SessionState::Handshaking => write!(f, "HANDSHAKING"),
            SessionState::Relaying => write!(f, "RELAYING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Shared handle to one session: its key, its packet queue and its state
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    key: String,
    queue: mpsc::Sender<Bytes>,
    state: Arc<AtomicU8>,
}

impl SessionHandle {
    /// Create a handle with a queue of `capacity` packets.
    ///
    /// A capacity of zero is raised to one. The receiver goes to the
    /// session's uplink task.
    pub fn new(id: u64, key: String, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = SessionHandle {
            id,
            key,
            queue: tx,
            state: Arc::new(AtomicU8::new(SessionState::New as u8)),
        };
        (handle, rx)
    }

    /// Unique id of this session
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Routing key (canonical peer address)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queue a payload without waiting.
    ///
    /// A full queue drops the payload with `QueueOverflow`.
    pub fn try_enqueue(&self, payload: Bytes) -> Result<(), TunnelError> {
        self.queue.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => TunnelError::QueueOverflow(self.key.clone()),
            TrySendError::Closed(_) => TunnelError::SessionClosed(self.key.clone()),
        })
    }
}

/// Concurrent map from routing key to session handle
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session
    pub async fn get(&self, key: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(key).cloned()
    }

    /// Insert or replace a session
    pub async fn set(&self, key: String, handle: SessionHandle) {
        self.inner.write().await.insert(key, handle);
    }

    /// Remove a session if present
    pub async fn delete(&self, key: &str) -> Option<SessionHandle> {
        self.inner.write().await.remove(key)
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no session is live
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Keys of all live sessions
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}
