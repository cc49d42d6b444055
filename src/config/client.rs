//! Client configuration types
//!
//! Defines the configuration of the UDP-facing side of the tunnel.

use super::TcpConfig;
use crate::helper::{
    duration_from_secs, DEFAULT_BUF_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS,
};
use crate::protocol::Endpoint;
use crate::relay::RelayOptions;
use serde::{Deserialize, Serialize};

/// Default idle timeout in seconds
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

/// Default per-session queue capacity
fn default_buf_size() -> usize {
    DEFAULT_BUF_SIZE
}

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// How local datagrams carry their target address
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum LocalMode {
    /// Every datagram goes to the configured `target`
    #[default]
    #[serde(rename = "fixed")]
    Fixed,
    /// Datagrams carry a SOCKS5 UDP request header
    #[serde(rename = "socks")]
    Socks,
}

/// Client configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Local UDP address to receive datagrams on (e.g., "127.0.0.1:5353")
    pub listen_addr: String,

    /// Tunnel server address (e.g., "relay.example.com:7000")
    pub remote_addr: String,

    /// Local packet convention
    #[serde(default)]
    pub mode: LocalMode,

    /// UDP target for `fixed` mode (e.g., "8.8.8.8:53")
    #[serde(default)]
    pub target: Option<String>,

    /// Session idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Per-session queue capacity
    #[serde(default = "default_buf_size")]
    pub buf_size: usize,

    /// Tunnel connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// TCP socket options for tunnel connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buf_size == 0 {
            return Err("buf_size must be greater than 0".to_string());
        }
        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.mode == LocalMode::Fixed {
            match &self.target {
                None => return Err("fixed mode requires a target".to_string()),
                Some(target) => {
                    target
                        .parse::<Endpoint>()
                        .map_err(|e| format!("invalid target: {}", e))?;
                }
            }
        }
        Ok(())
    }

    /// Parsed target endpoint, if one is configured
    pub fn target_endpoint(&self) -> Option<Endpoint> {
        self.target.as_deref().and_then(|t| t.parse().ok())
    }

    /// Relay engine options
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            idle_timeout: duration_from_secs(self.idle_timeout),
            queue_capacity: self.buf_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_config() -> ClientConfig {
        ClientConfig {
            listen_addr: "127.0.0.1:5353".to_string(),
            remote_addr: "127.0.0.1:7000".to_string(),
            mode: LocalMode::Fixed,
            target: Some("8.8.8.8:53".to_string()),
            idle_timeout: default_idle_timeout(),
            buf_size: default_buf_size(),
            connect_timeout: default_connect_timeout(),
            tcp: TcpConfig::default(),
        }
    }

    #[test]
    fn test_local_mode_default() {
        assert_eq!(LocalMode::default(), LocalMode::Fixed);
    }

    #[test]
    fn test_validate_ok() {
        assert!(base_config().validate().is_ok());

        let config = ClientConfig {
            mode: LocalMode::Socks,
            target: None,
            ..base_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = ClientConfig {
            buf_size: 0,
            ..base_config()
        };
        assert!(config.validate().unwrap_err().contains("buf_size"));

        let config = ClientConfig {
            idle_timeout: 0,
            ..base_config()
        };
        assert!(config.validate().unwrap_err().contains("idle_timeout"));
    }

    #[test]
    fn test_validate_fixed_target() {
        let config = ClientConfig {
            target: None,
            ..base_config()
        };
        assert!(config.validate().unwrap_err().contains("target"));

        let config = ClientConfig {
            target: Some("no-port".to_string()),
            ..base_config()
        };
        assert!(config.validate().unwrap_err().contains("invalid target"));
    }

    #[test]
    fn test_relay_options() {
        let config = ClientConfig {
            idle_timeout: 30,
            buf_size: 16,
            ..base_config()
        };
        let options = config.relay_options();
        assert_eq!(options.idle_timeout, Duration::from_secs(30));
        assert_eq!(options.queue_capacity, 16);
    }

    #[test]
    fn test_target_endpoint() {
        let config = base_config();
        assert_eq!(
            config.target_endpoint(),
            Some("8.8.8.8:53".parse().unwrap())
        );
    }
}
