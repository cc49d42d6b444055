//! Endpoint type and its SOCKS-style binary encoding
//!
//! ```text
//! +------+----------------------+----------+
//! | ATYP |       DST.ADDR       | DST.PORT |
//! +------+----------------------+----------+
//! |  1   | 4 / 16 / 1+len bytes |    2     |
//! +------+----------------------+----------+
//! ```

use crate::error::{Result, TunnelError};
use anyhow::Context;
use bytes::{Buf, BufMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// IPv4 address type
pub const ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name address type
pub const ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address type
pub const ADDR_TYPE_IPV6: u8 = 0x04;

/// Longest domain name that fits the length byte
pub const MAX_DOMAIN_LEN: usize = 255;

/// A UDP endpoint: an IP socket address or a domain name with port.
///
/// The `Display` form is the canonical text used as a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port, kept verbatim
    Domain(String, u16),
}

impl Endpoint {
    /// Create an endpoint from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Endpoint::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create an endpoint from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Endpoint::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create an endpoint from a domain name and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Endpoint::Domain(domain.into(), port)
    }

    /// Create an endpoint from a host string, choosing the IP variant when
    /// the host is an IP literal.
    pub fn from_host(host: &str, port: u16) -> Self {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        match bare.parse::<IpAddr>() {
            Ok(ip) => Endpoint::Ip(SocketAddr::new(ip, port)),
            Err(_) => Endpoint::Domain(host.to_string(), port),
        }
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            Endpoint::Ip(addr) => addr.port(),
            Endpoint::Domain(_, port) => *port,
        }
    }

    /// Get the address type byte
    pub fn addr_type(&self) -> u8 {
        match self {
            Endpoint::Ip(SocketAddr::V4(_)) => ADDR_TYPE_IPV4,
            Endpoint::Ip(SocketAddr::V6(_)) => ADDR_TYPE_IPV6,
            Endpoint::Domain(_, _) => ADDR_TYPE_DOMAIN,
        }
    }

    /// Number of bytes `encode` produces
    pub fn encoded_len(&self) -> usize {
        match self {
            Endpoint::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            Endpoint::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            Endpoint::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Append the encoded form to `buf`.
    ///
    /// Nothing is written when the domain name is too long.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Endpoint::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(ADDR_TYPE_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Endpoint::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(ADDR_TYPE_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Endpoint::Domain(domain, port) => {
                if domain.len() > MAX_DOMAIN_LEN {
                    return Err(TunnelError::AddressTooLong(domain.len()));
                }
                buf.put_u8(ADDR_TYPE_DOMAIN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// Decode one endpoint from the front of `buf`, advancing past it
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(TunnelError::MalformedAddress("missing address type".into()));
        }
        let atyp = buf.get_u8();
        let endpoint = match atyp {
            ADDR_TYPE_IPV4 => {
                ensure_remaining(buf, 4 + 2, "IPv4 address")?;
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                Endpoint::ipv4(Ipv4Addr::from(octets), buf.get_u16())
            }
            ADDR_TYPE_IPV6 => {
                ensure_remaining(buf, 16 + 2, "IPv6 address")?;
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                Endpoint::ipv6(Ipv6Addr::from(octets), buf.get_u16())
            }
            ADDR_TYPE_DOMAIN => {
                ensure_remaining(buf, 1, "domain length")?;
                let len = buf.get_u8() as usize;
                ensure_remaining(buf, len + 2, "domain name")?;
                let mut name = vec![0u8; len];
                buf.copy_to_slice(&mut name);
                Endpoint::Domain(domain_from_bytes(name)?, buf.get_u16())
            }
            other => {
                return Err(TunnelError::MalformedAddress(format!(
                    "unknown address type 0x{:02x}",
                    other
                )))
            }
        };
        Ok(endpoint)
    }

    /// Read exactly one encoded endpoint from a stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let atyp = reader
            .read_u8()
            .await
            .map_err(|e| TunnelError::from_address_io(e, "address type"))?;

        let endpoint = match atyp {
            ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                read_exact(reader, &mut octets, "IPv4 address").await?;
                Endpoint::ipv4(Ipv4Addr::from(octets), read_port(reader).await?)
            }
            ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                read_exact(reader, &mut octets, "IPv6 address").await?;
                Endpoint::ipv6(Ipv6Addr::from(octets), read_port(reader).await?)
            }
            ADDR_TYPE_DOMAIN => {
                let len = reader
                    .read_u8()
                    .await
                    .map_err(|e| TunnelError::from_address_io(e, "domain length"))?;
                let mut name = vec![0u8; len as usize];
                read_exact(reader, &mut name, "domain name").await?;
                Endpoint::Domain(domain_from_bytes(name)?, read_port(reader).await?)
            }
            other => {
                return Err(TunnelError::MalformedAddress(format!(
                    "unknown address type 0x{:02x}",
                    other
                )))
            }
        };
        Ok(endpoint)
    }

    /// Resolve the endpoint to a socket address.
    ///
    /// IP endpoints return immediately; domain names go through DNS.
    pub async fn resolve(&self) -> anyhow::Result<SocketAddr> {
        match self {
            Endpoint::Ip(addr) => Ok(*addr),
            Endpoint::Domain(domain, port) => {
                let resolved = tokio::net::lookup_host((domain.as_str(), *port))
                    .await
                    .with_context(|| format!("Failed to resolve domain: {}", domain))?
                    .next()
                    .with_context(|| format!("No addresses found for domain: {}", domain))?;
                Ok(resolved)
            }
        }
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(TunnelError::MalformedAddress(format!("truncated {}", what)));
    }
    Ok(())
}

fn domain_from_bytes(name: Vec<u8>) -> Result<String> {
    String::from_utf8(name)
        .map_err(|_| TunnelError::MalformedAddress("domain name is not valid UTF-8".into()))
}

async fn read_exact<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<()> {
    reader
        .read_exact(buf)
        .await
        .map_err(|e| TunnelError::from_address_io(e, what))?;
    Ok(())
}

async fn read_port<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u16> {
    reader
        .read_u16()
        .await
        .map_err(|e| TunnelError::from_address_io(e, "port"))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // IPv4-mapped IPv6 prints as dotted IPv4
            Endpoint::Ip(SocketAddr::V6(addr)) => match addr.ip().to_ipv4_mapped() {
                Some(v4) => write!(f, "{}:{}", v4, addr.port()),
                None => write!(f, "{}", addr),
            },
            Endpoint::Ip(addr) => write!(f, "{}", addr),
            Endpoint::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Ip(addr)
    }
}

impl FromStr for Endpoint {
    type Err = TunnelError;

    /// Parse `host:port`, where host is an IPv4 literal, a bracketed IPv6
    /// literal or a domain name.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Endpoint::Ip(addr));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TunnelError::Config(format!("missing port in address: {}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TunnelError::Config(format!("invalid port in address: {}", s)))?;
        if host.is_empty() {
            return Err(TunnelError::Config(format!("missing host in address: {}", s)));
        }
        Ok(Endpoint::from_host(host, port))
    }
}
