//! Tunnel framing
//!
//! A tunnel connection starts with one encoded [`Endpoint`] written by the
//! initiator, followed by any number of payload frames in either direction:
//!
//! ```text
//! +----------+-----------+
//! |  LENGTH  |  PAYLOAD  |
//! +----------+-----------+
//! |  2 (BE)  |  LENGTH   |
//! +----------+-----------+
//! ```

use super::address::Endpoint;
use crate::error::{Result, TunnelError};
use crate::helper::MAX_DATAGRAM_SIZE;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

/// Size of the frame length prefix
pub const FRAME_HEADER_LEN: usize = 2;

/// Which side of the tunnel a connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection and sent the handshake
    Initiator,
    /// Accepted the connection and read the handshake
    Acceptor,
}

/// Write the handshake address
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    target: &Endpoint,
) -> Result<()> {
    let buf = target.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    trace!("Wrote handshake for {}", target);
    Ok(())
}

/// Read the handshake address, consuming exactly its bytes
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Endpoint> {
    match Endpoint::read_from(reader).await {
        Ok(target) => Ok(target),
        Err(TunnelError::Io(e)) => Err(TunnelError::Handshake(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Write one payload frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_DATAGRAM_SIZE {
        return Err(TunnelError::PacketTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one payload frame into `buf`.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// A frame larger than `buf` is consumed in full before `ShortBuffer` is
/// returned, so the following frame stays aligned.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<Option<usize>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;
    let len = u16::from_be_bytes(header) as usize;

    if len > buf.len() {
        let mut rest = (&mut *reader).take(len as u64);
        let drained = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame").into());
        }
        return Err(TunnelError::ShortBuffer {
            frame_len: len,
            buf_len: buf.len(),
        });
    }

    reader.read_exact(&mut buf[..len]).await?;
    Ok(Some(len))
}

/// A byte stream carrying tunnel frames, after the handshake
#[derive(Debug)]
pub struct TunnelConn<S> {
    stream: S,
    role: Role,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TunnelConn<S> {
    /// Send the handshake for `target` on a freshly opened stream
    pub async fn initiate(mut stream: S, target: &Endpoint) -> Result<Self> {
        write_handshake(&mut stream, target).await?;
        Ok(TunnelConn {
            stream,
            role: Role::Initiator,
        })
    }

    /// Read the handshake from a freshly accepted stream
    pub async fn accept(mut stream: S) -> Result<(Self, Endpoint)> {
        let target = read_handshake(&mut stream).await?;
        Ok((
            TunnelConn {
                stream,
                role: Role::Acceptor,
            },
            target,
        ))
    }

    /// Which side of the tunnel this is
    pub fn role(&self) -> Role {
        self.role
    }

    /// Read one frame, see [`read_frame`]
    pub async fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        read_frame(&mut self.stream, buf).await
    }

    /// Write one frame, see [`write_frame`]
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, payload).await
    }

    /// Split into independently owned read and write sides
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        let (r, w) = tokio::io::split(self.stream);
        (FrameReader { inner: r }, FrameWriter { inner: w })
    }
}

/// Read side of a split [`TunnelConn`]
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one frame, see [`read_frame`]
    pub async fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        read_frame(&mut self.inner, buf).await
    }
}

/// Write side of a split [`TunnelConn`]
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Write one frame, see [`write_frame`]
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        write_frame(&mut self.inner, payload).await
    }

    /// Shut down the write direction of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
