//! Error types for udptun
//!
//! This module defines the typed errors raised by the wire codec, the framing
//! layer and the relay engines.

use std::io;
use thiserror::Error;

/// Main error type for tunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain name does not fit the one-byte length prefix
    #[error("Address too long: domain name is {0} bytes, limit is 255")]
    AddressTooLong(usize),

    /// Unknown address type or truncated address bytes
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// Payload exceeds the largest UDP datagram
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// Destination buffer smaller than the announced frame
    #[error("Short buffer: frame of {frame_len} bytes, buffer of {buf_len} bytes")]
    ShortBuffer {
        /// Length announced by the frame header
        frame_len: usize,
        /// Capacity of the caller's buffer
        buf_len: usize,
    },

    /// Handshake could not be completed
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Tunnel server could not be reached
    #[error("Dial error: {0}")]
    Dial(String),

    /// Session queue is full
    #[error("Queue overflow for session {0}")]
    QueueOverflow(String),

    /// Session is shutting down and no longer accepts packets
    #[error("Session closed: {0}")]
    SessionClosed(String),
}

impl TunnelError {
    /// Wrap an address-decoding I/O error, treating a truncated read as a
    /// malformed address.
    pub(crate) fn from_address_io(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TunnelError::MalformedAddress(format!("truncated {}", what))
        } else {
            TunnelError::Io(err)
        }
    }
}

/// Result alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;
