//! Server configuration types

use super::TcpConfig;
use crate::helper::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};

/// Default handshake timeout in seconds
fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP address to accept tunnel connections on (e.g., "0.0.0.0:7000")
    pub listen_addr: String,

    /// Time allowed for a new connection to send its handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// TCP socket options for accepted connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout == 0 {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}
