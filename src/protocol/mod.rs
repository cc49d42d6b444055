//! Protocol module for udptun
//!
//! This module implements the tunnel wire format: a SOCKS-style encoded
//! address sent once as the handshake, then length-prefixed datagram frames
//! in both directions.

mod address;
mod frame;

pub use address::{Endpoint, ADDR_TYPE_DOMAIN, ADDR_TYPE_IPV4, ADDR_TYPE_IPV6, MAX_DOMAIN_LEN};
pub use frame::{
    read_frame, read_handshake, write_frame, write_handshake, FrameReader, FrameWriter, Role,
    TunnelConn, FRAME_HEADER_LEN,
};
