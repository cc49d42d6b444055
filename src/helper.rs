//! Helper utilities for udptun
//!
//! Shared constants and small functions used by both relay engines.

use std::time::Duration;

/// Largest UDP payload: 65535 minus the 20-byte IP header and 8-byte UDP header
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Default per-session queue capacity
pub const DEFAULT_BUF_SIZE: usize = 8;

/// Default idle timeout in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Pick the reported outcome of a relay pair.
///
/// Tasks that stopped because their counterpart cancelled them return
/// `Ok(())`, so any `Err` here is genuine. The uplink error wins when both
/// failed.
pub fn first_error(uplink: anyhow::Result<()>, downlink: anyhow::Result<()>) -> anyhow::Result<()> {
    match (uplink, downlink) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_constants() {
        assert_eq!(MAX_DATAGRAM_SIZE, 65535 - 20 - 8);
        assert_eq!(DEFAULT_BUF_SIZE, 8);
        assert_eq!(DEFAULT_IDLE_TIMEOUT_SECS, 300);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_SECS, 10);
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(5), Duration::from_secs(5));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
        assert_eq!(duration_from_secs(300), Duration::from_secs(300));
    }

    #[test]
    fn test_first_error_both_ok() {
        assert!(first_error(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_first_error_prefers_uplink() {
        let result = first_error(Err(anyhow!("uplink")), Err(anyhow!("downlink")));
        assert_eq!(result.unwrap_err().to_string(), "uplink");
    }

    #[test]
    fn test_first_error_downlink_only() {
        let result = first_error(Ok(()), Err(anyhow!("downlink")));
        assert_eq!(result.unwrap_err().to_string(), "downlink");
    }
}
