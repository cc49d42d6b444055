//! Tunnel server address with cached resolution
//!
//! Sessions dial the same server over and over; resolving it once avoids a
//! DNS lookup per session.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Address that may have a cached resolved address
#[derive(Debug, Clone)]
pub struct AddrMaybeCached {
    /// The original address string
    addr: String,
    /// Cached resolved address
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl AddrMaybeCached {
    /// Create a new address without cached resolution
    pub fn new(addr: &str) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the original address string
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the cached address if available
    pub async fn get_cached(&self) -> Option<SocketAddr> {
        *self.cached.read().await
    }

    /// Drop the cached address so the next `resolve` looks it up again
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    /// Resolve the address, using cache if available
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Some(cached) = self.get_cached().await {
            return Ok(cached);
        }

        let resolved = tokio::net::lookup_host(self.addr.as_str())
            .await
            .with_context(|| format!("Failed to resolve address: {}", self.addr))?
            .next()
            .with_context(|| format!("No addresses found for: {}", self.addr))?;

        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }
}

impl From<SocketAddr> for AddrMaybeCached {
    fn from(addr: SocketAddr) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(Some(addr))),
        }
    }
}

impl From<&str> for AddrMaybeCached {
    fn from(addr: &str) -> Self {
        AddrMaybeCached::new(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_new_is_uncached() {
        let addr = AddrMaybeCached::new("relay.example.com:7000");
        assert_eq!(addr.addr(), "relay.example.com:7000");
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_caches() {
        let addr = AddrMaybeCached::new("127.0.0.1:7000");
        let resolved = addr.resolve().await.unwrap();
        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(resolved.port(), 7000);
        assert_eq!(addr.get_cached().await, Some(resolved));

        addr.clear_cache().await;
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_from_socket_addr_is_cached() {
        let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 443);
        let addr: AddrMaybeCached = socket_addr.into();
        assert_eq!(addr.resolve().await.unwrap(), socket_addr);
    }

    #[tokio::test]
    async fn test_clones_share_cache() {
        let addr = AddrMaybeCached::new("127.0.0.1:9");
        let clone = addr.clone();
        addr.resolve().await.unwrap();
        assert!(clone.get_cached().await.is_some());
    }
}
