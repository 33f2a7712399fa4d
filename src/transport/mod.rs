//! Transport module - the byte channel a session talks over.
//!
//! The protocol engine never opens or configures ports. It needs a duplex
//! byte channel that delivers bytes in order, possibly fragmented:
//! - [`Transport`]: the trait a session drives
//! - [`StreamTransport`]: adapter for any tokio `AsyncRead + AsyncWrite`
//!   (serial port streams, TCP bridges, `tokio::io::duplex` in tests)

mod stream;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

pub use stream::{StreamTransport, DEFAULT_READ_CHUNK_SIZE};

/// Duplex byte channel owned by a [`Session`](crate::Session).
///
/// Implementations report a closed channel (EOF, unplugged adapter) as
/// [`MspError::TransportClosed`](crate::MspError::TransportClosed).
pub trait Transport: Send + 'static {
    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `timeout` for input.
    ///
    /// Returns whatever bytes are available, or an empty buffer if the
    /// timeout elapsed first.
    fn read_available(&mut self, timeout: Duration) -> impl Future<Output = Result<Bytes>> + Send;

    /// Close the channel. Further calls may fail.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
