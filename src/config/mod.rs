//! Configuration module for udptun
//!
//! This module provides configuration types and parsing for both ends of
//! the tunnel.

mod client;
mod server;
mod transport;

pub use client::{ClientConfig, LocalMode};
pub use server::ServerConfig;
pub use transport::TcpConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Client configuration
    #[serde(default)]
    pub client: Option<ClientConfig>,

    /// Server configuration
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;

    if let Some(client) = &config.client {
        client
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [client] section: {}", e))?;
    }
    if let Some(server) = &config.server {
        server
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [server] section: {}", e))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_client_config() {
        let config_str = r#"
[client]
listen_addr = "127.0.0.1:5353"
remote_addr = "relay.example.com:7000"
target = "8.8.8.8:53"
"#;

        let config = parse_config(config_str).unwrap();
        let client = config.client.unwrap();
        assert_eq!(client.listen_addr, "127.0.0.1:5353");
        assert_eq!(client.remote_addr, "relay.example.com:7000");
        assert_eq!(client.mode, LocalMode::Fixed);
        assert_eq!(client.idle_timeout, 300);
        assert_eq!(client.buf_size, 8);
        assert!(config.server.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[client]
listen_addr = "127.0.0.1:1080"
remote_addr = "relay.example.com:7000"
mode = "socks"
idle_timeout = 60
buf_size = 32
connect_timeout = 5

[client.tcp]
nodelay = false
keepalive_secs = 30
keepalive_interval = 10

[server]
listen_addr = "0.0.0.0:7000"
handshake_timeout = 3
"#;

        let config = parse_config(config_str).unwrap();
        let client = config.client.unwrap();
        assert_eq!(client.mode, LocalMode::Socks);
        assert_eq!(client.idle_timeout, 60);
        assert_eq!(client.buf_size, 32);
        assert_eq!(client.connect_timeout, 5);
        assert!(!client.tcp.nodelay);
        assert_eq!(client.tcp.keepalive_secs, 30);

        let server = config.server.unwrap();
        assert_eq!(server.listen_addr, "0.0.0.0:7000");
        assert_eq!(server.handshake_timeout, 3);
        assert!(server.tcp.nodelay);
    }

    #[test]
    fn test_parse_rejects_invalid_client() {
        let config_str = r#"
[client]
listen_addr = "127.0.0.1:5353"
remote_addr = "relay.example.com:7000"
"#;
        let err = parse_config(config_str).unwrap_err();
        assert!(err.to_string().contains("[client]"));
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let config_str = r#"
[client]
listen_addr = "127.0.0.1:5353"
remote_addr = "relay.example.com:7000"
mode = "tproxy"
"#;
        assert!(parse_config(config_str).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten_addr = \"127.0.0.1:7000\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.unwrap().listen_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/udptun.toml").is_err());
    }
}
