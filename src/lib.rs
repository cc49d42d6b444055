//! # Udptun - UDP over TCP Tunnel
//!
//! Udptun carries UDP datagrams across a TCP connection. The client side
//! receives datagrams from local peers and multiplexes them into one tunnel
//! connection per peer; the server side terminates each tunnel connection and
//! relays its datagrams to the real UDP target.
//!
//! ## Features
//!
//! - **Per-Peer Sessions**: Each local peer gets its own tunnel connection
//! - **Self-Describing Handshake**: The target address travels as the first
//!   bytes of every tunnel connection
//! - **Length-Prefixed Frames**: Datagram boundaries survive the byte stream
//! - **Two Local Conventions**: A fixed target, or SOCKS5 UDP request headers
//! - **Idle Teardown**: Quiet sessions are closed and their state released
//!
//! ## Usage
//!
//! ```rust,ignore
//! use udptun::config::load_config;
//! use udptun::relay::run_client;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_client(config.client.unwrap(), shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! UDP peer -> udptun client -> (TCP) -> udptun server -> UDP target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod protocol;
pub mod relay;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::TunnelError;
pub use protocol::{Endpoint, TunnelConn};
pub use relay::{run_client, run_server, ClientRelay, ServerRelay};

/// Version of the udptun library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
