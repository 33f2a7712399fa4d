//! Stream transport over any tokio byte stream.
//!
//! # Example
//!
//! ```
//! use msp_client::transport::StreamTransport;
//!
//! # async fn run() -> msp_client::Result<()> {
//! let (host, _device) = tokio::io::duplex(1024);
//! let session = msp_client::Session::builder()
//!     .negotiate_on_connect(false)
//!     .connect(StreamTransport::new(host))
//!     .await?;
//! # drop(session);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Transport;
use crate::error::{MspError, Result};

/// Default read chunk size. MSP replies are small; a jumbo frame simply
/// arrives over several reads.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256;

/// [`Transport`] over an `AsyncRead + AsyncWrite` stream.
pub struct StreamTransport<S> {
    stream: S,
    read_buf: BytesMut,
    chunk_size: usize,
    closed: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a stream with the default read chunk size.
    pub fn new(stream: S) -> Self {
        Self::with_chunk_size(stream, DEFAULT_READ_CHUNK_SIZE)
    }

    /// Wrap a stream with a custom read chunk size.
    pub fn with_chunk_size(stream: S, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            stream,
            read_buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            closed: false,
        }
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn io_closed(err: std::io::Error) -> MspError {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::WriteZero => MspError::TransportClosed,
            _ => MspError::Io(err),
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(MspError::TransportClosed);
        }
        self.stream.write_all(data).await.map_err(Self::io_closed)?;
        self.stream.flush().await.map_err(Self::io_closed)?;
        Ok(())
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<Bytes> {
        if self.closed {
            return Err(MspError::TransportClosed);
        }

        self.read_buf.clear();
        self.read_buf.resize(self.chunk_size, 0);

        match tokio::time::timeout(timeout, self.stream.read(&mut self.read_buf)).await {
            Err(_elapsed) => Ok(Bytes::new()),
            Ok(Ok(0)) => {
                self.closed = true;
                Err(MspError::TransportClosed)
            }
            Ok(Ok(n)) => {
                self.read_buf.truncate(n);
                Ok(self.read_buf.split().freeze())
            }
            Ok(Err(e)) => Err(Self::io_closed(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown().await.map_err(Self::io_closed)?;
        Ok(())
    }
}
