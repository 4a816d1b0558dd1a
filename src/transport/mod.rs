// src/transport/mod.rs

//! Duplex transport between coordinator and node.
//!
//! Envelopes produced by [`crate::protocol::codec`] are framed with a
//! big-endian `u32` length prefix. The transport owns framing and ordering
//! only; it knows nothing about message semantics.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::errors::Result;
use crate::protocol::{NodeMessage, ProtocolError, encode_message};

/// Default upper bound on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads length-prefixed frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection between frames.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if len > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            }
            .into());
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

/// Writes length-prefixed frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and send one message.
    pub async fn send(&mut self, message: &NodeMessage) -> Result<()> {
        let bytes = encode_message(message)?;
        self.send_frame(&bytes).await
    }

    /// Send an already-encoded envelope.
    pub async fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: bytes.len(),
            max: u32::MAX as usize,
        })?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        debug!(bytes = bytes.len(), "frame sent");
        Ok(())
    }
}

/// Open a TCP connection to the coordinator and split it into framed halves.
pub async fn connect(
    host: &str,
    port: u16,
    max_frame_bytes: usize,
) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>)> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    info!(host, port, "connected to coordinator");
    Ok(split(stream, max_frame_bytes))
}

/// Split an established stream into framed halves.
pub fn split(
    stream: TcpStream,
    max_frame_bytes: usize,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (
        FrameReader::new(read, max_frame_bytes),
        FrameWriter::new(write),
    )
}
