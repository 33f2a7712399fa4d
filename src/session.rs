//! Session builder and request/response engine.
//!
//! The [`SessionBuilder`] provides a fluent API for configuring timeouts,
//! retries and version negotiation. The [`Session`] turns a half-duplex byte
//! channel into a serialized request/response API:
//! 1. Acquire the exclusive gate (one request in flight)
//! 2. Pick the wire version, negotiating first if it is still unknown
//! 3. Encode and write the request
//! 4. Feed incoming bytes to the frame buffer until the matching reply
//!    arrives or the attempt deadline passes, re-sending on timeout
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use msp_client::{command, Session};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> msp_client::Result<()> {
//! let session = Session::builder()
//!     .timeout(Duration::from_millis(500))
//!     .max_retries(3)
//!     .connect_stream(port)
//!     .await?;
//!
//! let attitude = session.request(command::MSP_ATTITUDE, &[]).await?;
//! println!("{} bytes, {:?}", attitude.len(), session.negotiated_version());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::command::{ApiVersion, MSP_API_VERSION};
use crate::diagnostics::{Diagnostics, SessionStats};
use crate::error::{MspError, Result};
use crate::protocol::{encode, Direction, Frame, FrameBuffer, ProtocolVersion, MAX_PAYLOAD_SIZE};
use crate::transport::{StreamTransport, Transport, DEFAULT_READ_CHUNK_SIZE};

/// Default per-attempt response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of re-sends after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Upper bound on reads when draining stale input.
const MAX_DRAIN_READS: usize = 64;

/// Deadline used when a timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Timeout and retry policy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long each attempt waits for a reply.
    pub timeout: Duration,
    /// Re-sends after the first attempt. Total attempts is `max_retries + 1`.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }

    /// Worst-case time a request can take under this policy.
    ///
    /// Saturates at `Duration::MAX`.
    pub fn budget(&self) -> Duration {
        self.timeout
            .checked_mul(self.max_retries.saturating_add(1))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Policy used by [`Session::request`] and negotiation probes.
    pub retry: RetryPolicy,
    /// Probe the device version during `connect`.
    pub negotiate_on_connect: bool,
    /// Use this version and never probe.
    pub forced_version: Option<ProtocolVersion>,
    /// Read chunk size for [`SessionBuilder::connect_stream`].
    pub read_chunk_size: usize,
    /// Largest payload the frame buffer accepts before resynchronizing.
    pub max_payload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            negotiate_on_connect: true,
            forced_version: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

/// Wire version in use by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiatedVersion {
    /// Not negotiated yet, or the last negotiation failed.
    Unknown,
    V1,
    V2,
}

impl NegotiatedVersion {
    /// The protocol version, if one has been settled.
    pub fn protocol(self) -> Option<ProtocolVersion> {
        match self {
            NegotiatedVersion::Unknown => None,
            NegotiatedVersion::V1 => Some(ProtocolVersion::V1),
            NegotiatedVersion::V2 => Some(ProtocolVersion::V2),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            NegotiatedVersion::Unknown => 0,
            NegotiatedVersion::V1 => 1,
            NegotiatedVersion::V2 => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => NegotiatedVersion::V1,
            2 => NegotiatedVersion::V2,
            _ => NegotiatedVersion::Unknown,
        }
    }
}

impl From<ProtocolVersion> for NegotiatedVersion {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V1 => NegotiatedVersion::V1,
            ProtocolVersion::V2 => NegotiatedVersion::V2,
        }
    }
}

impl fmt::Display for NegotiatedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol() {
            Some(version) => version.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

/// Lifecycle of the in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    Idle,
    Sent,
    AwaitingResponse,
    Fulfilled,
    TimedOut,
    Errored,
}

impl RequestState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Fulfilled | RequestState::TimedOut | RequestState::Errored
        )
    }
}

/// The single request a session has on the wire.
///
/// Left in the slot with a non-terminal state when the caller's future is
/// dropped; the next request treats that as abandoned.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    command: u16,
    /// Encoded frame, re-sent unchanged on every attempt.
    wire: Vec<u8>,
    deadline: Instant,
    retries_remaining: u32,
    attempts: u32,
    state: RequestState,
}

impl PendingRequest {
    fn new(command: u16, wire: Vec<u8>, max_retries: u32) -> Self {
        Self {
            command,
            wire,
            deadline: Instant::now(),
            retries_remaining: max_retries,
            attempts: 0,
            state: RequestState::Idle,
        }
    }

    fn begin_attempt(&mut self, timeout: Duration) {
        self.attempts += 1;
        self.deadline = deadline_after(timeout);
        self.state = RequestState::Sent;
    }

    fn matches(&self, frame: &Frame) -> bool {
        !frame.is_request() && frame.command() == self.command
    }

    /// Move to a terminal state. Returns `false` if already settled.
    fn settle(&mut self, state: RequestState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}

/// `now + timeout`, clamped for timeouts too large for an `Instant`.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Everything guarded by the session gate.
struct Connection<T> {
    transport: T,
    frames: FrameBuffer,
    in_flight: Option<PendingRequest>,
}

struct Shared<T> {
    conn: Mutex<Connection<T>>,
    version: AtomicU8,
    closed: AtomicBool,
    discarded: AtomicU64,
    diagnostics: Diagnostics,
    config: SessionConfig,
}

/// Builder for configuring and connecting a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt response timeout.
    ///
    /// Default: 1 second
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.timeout = timeout;
        self
    }

    /// Set the number of re-sends after the first attempt.
    ///
    /// Default: 2
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set timeout and retries together.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Probe the device version while connecting.
    ///
    /// When disabled the first request negotiates instead.
    /// Default: true
    pub fn negotiate_on_connect(mut self, enabled: bool) -> Self {
        self.config.negotiate_on_connect = enabled;
        self
    }

    /// Skip negotiation and always use `version`.
    pub fn force_version(mut self, version: ProtocolVersion) -> Self {
        self.config.forced_version = Some(version);
        self
    }

    /// Set the read chunk size used by [`connect_stream`](Self::connect_stream).
    ///
    /// Default: 256
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set the largest declared payload the frame buffer accepts.
    ///
    /// Default: 65535
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build a session over `transport`.
    ///
    /// With eager negotiation enabled, a failed probe is logged and left for
    /// the first request to retry. Only a closed transport fails the connect.
    pub async fn connect<T: Transport>(self, transport: T) -> Result<Session<T>> {
        let session = Session::with_config(transport, self.config);
        if session.shared.config.forced_version.is_none() && session.shared.config.negotiate_on_connect {
            match session.renegotiate().await {
                Ok(_) => {}
                Err(MspError::TransportClosed) => return Err(MspError::TransportClosed),
                Err(e) => {
                    tracing::warn!("Version negotiation on connect failed: {}", e);
                }
            }
        }
        Ok(session)
    }

    /// Build a session over a tokio byte stream.
    pub async fn connect_stream<S>(self, stream: S) -> Result<Session<StreamTransport<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let transport = StreamTransport::with_chunk_size(stream, self.config.read_chunk_size);
        self.connect(transport).await
    }
}

/// A protocol session over one transport.
///
/// Cloning is cheap; clones share the transport, the gate and statistics.
pub struct Session<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("version", &self.negotiated_version())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// The transport is picked by `SessionBuilder::connect`, so `builder` lives on
// a fixed instantiation to keep `Session::builder()` inferable.
impl Session<()> {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }
}

impl<T> Session<T> {
    /// Version in use; `Unknown` until negotiation succeeds.
    pub fn negotiated_version(&self) -> NegotiatedVersion {
        NegotiatedVersion::from_u8(self.shared.version.load(Ordering::Acquire))
    }

    /// Snapshot of cumulative statistics.
    pub fn stats(&self) -> SessionStats {
        self.shared
            .diagnostics
            .snapshot(self.shared.discarded.load(Ordering::Relaxed))
    }

    /// Whether the transport is closed. Every request fails once it is.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    fn set_version(&self, version: NegotiatedVersion) {
        self.shared.version.store(version.to_u8(), Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MspError::TransportClosed)
        } else {
            Ok(())
        }
    }
}

impl<T: Transport> Session<T> {
    /// Connect with default configuration.
    pub async fn connect(transport: T) -> Result<Self> {
        SessionBuilder::new().connect(transport).await
    }

    /// Create a session without any I/O.
    ///
    /// Negotiation happens on the first request unless a version is forced.
    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let version = config
            .forced_version
            .map(NegotiatedVersion::from)
            .unwrap_or(NegotiatedVersion::Unknown);
        let conn = Connection {
            transport,
            frames: FrameBuffer::with_max_payload(config.max_payload_size),
            in_flight: None,
        };
        Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                version: AtomicU8::new(version.to_u8()),
                closed: AtomicBool::new(false),
                discarded: AtomicU64::new(0),
                diagnostics: Diagnostics::new(),
                config,
            }),
        }
    }

    /// Send `command` with the default policy and return the reply payload.
    pub async fn request(&self, command: u16, payload: &[u8]) -> Result<Bytes> {
        self.request_with(command, payload, self.shared.config.retry)
            .await
    }

    /// Send `command` with an explicit timeout/retry policy.
    ///
    /// Dropping the returned future abandons the request; its late reply is
    /// discarded by the next request.
    pub async fn request_with(
        &self,
        command: u16,
        payload: &[u8],
        policy: RetryPolicy,
    ) -> Result<Bytes> {
        self.ensure_open()?;
        let mut conn = self.shared.conn.lock().await;
        self.ensure_open()?;
        self.recover_abandoned(&mut conn).await?;

        let version = match self.negotiated_version().protocol() {
            Some(version) => version,
            None => self.negotiate_locked(&mut conn).await?,
        };

        let frame = self
            .exchange(&mut conn, command, payload, version, policy)
            .await?;
        Ok(frame.into_payload())
    }

    /// Discard any cached version and probe the device again.
    ///
    /// With a forced version configured this returns it without probing.
    pub async fn renegotiate(&self) -> Result<ProtocolVersion> {
        self.ensure_open()?;
        let mut conn = self.shared.conn.lock().await;
        self.ensure_open()?;
        self.recover_abandoned(&mut conn).await?;
        self.negotiate_locked(&mut conn).await
    }

    /// Discard buffered input and partial frames.
    ///
    /// Returns the number of bytes read off the transport.
    pub async fn flush_input(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut conn = self.shared.conn.lock().await;
        let conn = &mut *conn;

        let mut flushed = 0;
        for _ in 0..MAX_DRAIN_READS {
            let chunk = match conn.transport.read_available(Duration::ZERO).await {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.note_error(e)),
            };
            if chunk.is_empty() {
                break;
            }
            flushed += chunk.len();
        }
        conn.frames.clear();
        self.sync_discarded(&conn.frames);
        tracing::debug!(flushed, "Input flushed");
        Ok(flushed)
    }

    /// Close the transport. Later calls fail with `TransportClosed`.
    pub async fn disconnect(&self) -> Result<()> {
        let mut conn = self.shared.conn.lock().await;
        self.shared.closed.store(true, Ordering::Release);
        conn.in_flight = None;
        conn.transport.close().await
    }

    async fn negotiate_locked(&self, conn: &mut Connection<T>) -> Result<ProtocolVersion> {
        if let Some(forced) = self.shared.config.forced_version {
            self.set_version(forced.into());
            return Ok(forced);
        }

        self.set_version(NegotiatedVersion::Unknown);
        self.shared.diagnostics.record_negotiation();

        let reply = self
            .exchange(
                conn,
                MSP_API_VERSION,
                &[],
                ProtocolVersion::V1,
                self.shared.config.retry,
            )
            .await?;

        let version = if reply.version() == ProtocolVersion::V2 {
            ProtocolVersion::V2
        } else if ApiVersion::decode(reply.payload())?.supports_v2() {
            ProtocolVersion::V2
        } else {
            ProtocolVersion::V1
        };

        self.set_version(version.into());
        tracing::info!(version = %version, "Negotiated MSP version");
        Ok(version)
    }

    /// Count and drain after a request whose caller went away.
    async fn recover_abandoned(&self, conn: &mut Connection<T>) -> Result<()> {
        let abandoned = match conn.in_flight.take() {
            Some(pending) if !pending.state.is_terminal() => pending,
            _ => return Ok(()),
        };

        self.shared.diagnostics.record_abandoned();
        tracing::debug!(
            command = abandoned.command,
            attempts = abandoned.attempts,
            "Recovering from abandoned request"
        );

        for _ in 0..MAX_DRAIN_READS {
            let chunk = match conn.transport.read_available(Duration::ZERO).await {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.note_error(e)),
            };
            if chunk.is_empty() {
                break;
            }
            for result in conn.frames.push(&chunk) {
                self.discard_result(result);
            }
        }
        self.sync_discarded(&conn.frames);
        Ok(())
    }

    /// Run one request through every attempt.
    async fn exchange(
        &self,
        conn: &mut Connection<T>,
        command: u16,
        payload: &[u8],
        version: ProtocolVersion,
        policy: RetryPolicy,
    ) -> Result<Frame> {
        let wire = encode(Direction::Request, command, payload, version)?;
        self.shared.diagnostics.record_request();

        let Connection {
            transport,
            frames,
            in_flight,
        } = conn;
        let pending = in_flight.insert(PendingRequest::new(command, wire, policy.max_retries));

        let started = Instant::now();
        let result = self.drive(transport, frames, pending, policy.timeout).await;
        self.shared
            .diagnostics
            .record_exchange(command, started.elapsed(), result.is_ok());

        *in_flight = None;
        self.sync_discarded(frames);
        result.map_err(|e| self.note_error(e))
    }

    async fn drive(
        &self,
        transport: &mut T,
        frames: &mut FrameBuffer,
        pending: &mut PendingRequest,
        timeout: Duration,
    ) -> Result<Frame> {
        let diagnostics = &self.shared.diagnostics;
        loop {
            pending.begin_attempt(timeout);
            tracing::debug!(
                command = pending.command,
                attempt = pending.attempts,
                len = pending.wire.len(),
                "Sending request"
            );

            if let Err(e) = transport.write(&pending.wire).await {
                pending.settle(RequestState::Errored);
                return Err(e);
            }
            pending.state = RequestState::AwaitingResponse;

            match self.await_response(transport, frames, pending).await {
                Ok(Some(frame)) if frame.is_error() => {
                    pending.settle(RequestState::Errored);
                    diagnostics.record_rejection();
                    tracing::warn!("Device rejected command {}", pending.command);
                    return Err(MspError::DeviceRejected(pending.command));
                }
                Ok(Some(frame)) => {
                    pending.settle(RequestState::Fulfilled);
                    diagnostics.record_response();
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    pending.settle(RequestState::Errored);
                    return Err(e);
                }
            }

            if pending.retries_remaining == 0 {
                pending.settle(RequestState::TimedOut);
                diagnostics.record_timeout();
                tracing::warn!(
                    "Command {} timed out after {} attempts",
                    pending.command,
                    pending.attempts
                );
                return Err(MspError::Timeout {
                    command: pending.command,
                    attempts: pending.attempts,
                });
            }

            pending.retries_remaining -= 1;
            diagnostics.record_retry();
            tracing::debug!(command = pending.command, "No response, retrying");
        }
    }

    /// Wait for the matching reply until the attempt deadline.
    ///
    /// Returns `None` when the deadline passes.
    async fn await_response(
        &self,
        transport: &mut T,
        frames: &mut FrameBuffer,
        pending: &PendingRequest,
    ) -> Result<Option<Frame>> {
        loop {
            let now = Instant::now();
            if now >= pending.deadline {
                return Ok(None);
            }

            let chunk = transport.read_available(pending.deadline - now).await?;
            if chunk.is_empty() {
                continue;
            }

            let mut matched = None;
            for result in frames.push(&chunk) {
                match result {
                    Ok(frame) if matched.is_none() && pending.matches(&frame) => {
                        matched = Some(frame);
                    }
                    other => self.discard_result(other),
                }
            }
            if matched.is_some() {
                return Ok(matched);
            }
        }
    }

    fn discard_result(&self, result: crate::protocol::FrameResult) {
        match result {
            Ok(frame) => {
                self.shared.diagnostics.record_stale_frame();
                tracing::debug!(
                    command = frame.command(),
                    direction = ?frame.direction(),
                    "Dropping stale frame"
                );
            }
            Err(corrupt) => {
                self.shared.diagnostics.record_checksum_failure();
                tracing::debug!("Dropping corrupt frame: {}", corrupt);
            }
        }
    }

    fn sync_discarded(&self, frames: &FrameBuffer) {
        self.shared
            .discarded
            .store(frames.discarded_bytes(), Ordering::Relaxed);
    }

    /// Make `TransportClosed` sticky.
    fn note_error(&self, err: MspError) -> MspError {
        if matches!(err, MspError::TransportClosed)
            && !self.shared.closed.swap(true, Ordering::AcqRel)
        {
            tracing::warn!("Transport closed");
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Answer each request with the next scripted reply; `None` stays silent.
    fn spawn_device(
        mut device: DuplexStream,
        replies: Vec<Option<Vec<u8>>>,
    ) -> tokio::task::JoinHandle<Vec<Frame>> {
        tokio::spawn(async move {
            let mut frames = FrameBuffer::new();
            let mut seen = Vec::new();
            let mut replies = replies.into_iter();
            let mut buf = [0u8; 256];
            loop {
                let n = match device.read(&mut buf).await {
                    Ok(0) | Err(_) => return seen,
                    Ok(n) => n,
                };
                for frame in frames.push(&buf[..n]).into_iter().flatten() {
                    seen.push(frame);
                    if let Some(Some(reply)) = replies.next() {
                        if device.write_all(&reply).await.is_err() {
                            return seen;
                        }
                    }
                }
            }
        })
    }

    fn reply(command: u16, payload: &[u8], version: ProtocolVersion) -> Option<Vec<u8>> {
        Some(encode(Direction::Response, command, payload, version).unwrap())
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            retry: RetryPolicy::new(Duration::from_millis(40), 1),
            ..Default::default()
        }
    }

    #[test]
    fn test_builder_defaults() {
        let builder = Session::builder();
        let config = builder.config();
        assert_eq!(config.retry.timeout, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.negotiate_on_connect);
        assert_eq!(config.forced_version, None);
        assert_eq!(config.read_chunk_size, 256);
        assert_eq!(config.max_payload_size, 65535);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = SessionBuilder::new()
            .timeout(Duration::from_millis(250))
            .max_retries(5)
            .negotiate_on_connect(false)
            .force_version(ProtocolVersion::V2)
            .read_chunk_size(64)
            .max_payload_size(512);

        let config = builder.config();
        assert_eq!(config.retry, RetryPolicy::new(Duration::from_millis(250), 5));
        assert!(!config.negotiate_on_connect);
        assert_eq!(config.forced_version, Some(ProtocolVersion::V2));
        assert_eq!(config.read_chunk_size, 64);
        assert_eq!(config.max_payload_size, 512);
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 2);
        assert_eq!(policy.budget(), Duration::from_millis(300));

        let unbounded = RetryPolicy::new(Duration::from_secs(1), u32::MAX);
        assert_eq!(unbounded.budget(), Duration::from_secs(u32::MAX as u64 + 1));
        assert_eq!(RetryPolicy::new(Duration::MAX, 1).budget(), Duration::MAX);
    }

    #[test]
    fn test_huge_timeout_clamps_deadline() {
        let mut pending = PendingRequest::new(101, vec![], 0);
        pending.begin_attempt(Duration::MAX);
        assert!(pending.deadline > Instant::now() + Duration::from_secs(86_400));
    }

    #[test]
    fn test_pending_request_settles_once() {
        let mut pending = PendingRequest::new(101, vec![], 0);
        assert_eq!(pending.state, RequestState::Idle);

        pending.begin_attempt(Duration::from_millis(10));
        assert_eq!(pending.state, RequestState::Sent);
        assert_eq!(pending.attempts, 1);

        assert!(pending.settle(RequestState::Fulfilled));
        assert!(!pending.settle(RequestState::TimedOut));
        assert_eq!(pending.state, RequestState::Fulfilled);
    }

    #[test]
    fn test_negotiated_version_conversions() {
        for version in [
            NegotiatedVersion::Unknown,
            NegotiatedVersion::V1,
            NegotiatedVersion::V2,
        ] {
            assert_eq!(NegotiatedVersion::from_u8(version.to_u8()), version);
        }
        assert_eq!(NegotiatedVersion::Unknown.protocol(), None);
        assert_eq!(
            NegotiatedVersion::from(ProtocolVersion::V2).protocol(),
            Some(ProtocolVersion::V2)
        );
        assert_eq!(NegotiatedVersion::Unknown.to_string(), "unknown");
        assert_eq!(NegotiatedVersion::V1.to_string(), "v1");
    }

    #[tokio::test]
    async fn test_forced_version_request_roundtrip() {
        let (host, device) = duplex(1024);
        let device = spawn_device(device, vec![reply(108, &[1, 2, 3, 4, 5, 6], ProtocolVersion::V1)]);

        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);
        assert_eq!(session.negotiated_version(), NegotiatedVersion::V1);

        let payload = session.request(108, &[]).await.unwrap();
        assert_eq!(&payload[..], &[1, 2, 3, 4, 5, 6]);

        let stats = session.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.responses, 1);
        assert_eq!(stats.negotiations, 0);

        session.disconnect().await.unwrap();
        let seen = device.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].command(), 108);
    }

    #[tokio::test]
    async fn test_negotiation_on_first_request() {
        let (host, device) = duplex(1024);
        let device = spawn_device(
            device,
            vec![
                reply(MSP_API_VERSION, &[0, 2, 5], ProtocolVersion::V1),
                reply(0x2000, b"status", ProtocolVersion::V2),
            ],
        );

        let session = Session::with_config(StreamTransport::new(host), fast_config());
        assert_eq!(session.negotiated_version(), NegotiatedVersion::Unknown);

        let payload = session.request(0x2000, &[]).await.unwrap();
        assert_eq!(&payload[..], b"status");
        assert_eq!(session.negotiated_version(), NegotiatedVersion::V2);

        session.disconnect().await.unwrap();
        let seen = device.await.unwrap();
        assert_eq!(seen[0].version(), ProtocolVersion::V1);
        assert_eq!(seen[0].command(), MSP_API_VERSION);
        assert_eq!(seen[1].version(), ProtocolVersion::V2);
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let (host, device) = duplex(1024);
        let device = spawn_device(device, vec![]);

        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);

        let err = session.request(101, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            MspError::Timeout {
                command: 101,
                attempts: 2
            }
        ));
        assert_eq!(session.stats().retries, 1);
        assert_eq!(session.stats().timeouts, 1);

        session.disconnect().await.unwrap();
        assert_eq!(device.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_frame_is_rejection() {
        let (host, device) = duplex(1024);
        let error = Some(encode(Direction::Error, 205, &[], ProtocolVersion::V1).unwrap());
        let device = spawn_device(device, vec![error]);

        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);

        let err = session.request(205, &[]).await.unwrap_err();
        assert!(matches!(err, MspError::DeviceRejected(205)));
        assert_eq!(session.stats().device_rejections, 1);

        session.disconnect().await.unwrap();
        assert_eq!(device.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_v1_session_refuses_v2_commands() {
        let (host, _device) = duplex(1024);
        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);

        let err = session.request(0x2000, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            MspError::UnsupportedCommandForVersion {
                command: 0x2000,
                version: ProtocolVersion::V1
            }
        ));
        assert_eq!(session.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_transport_closed_is_sticky() {
        let (host, device) = duplex(1024);
        drop(device);

        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);

        assert!(matches!(
            session.request(101, &[]).await,
            Err(MspError::TransportClosed)
        ));
        assert!(session.is_closed());
        assert!(matches!(
            session.flush_input().await,
            Err(MspError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_flush_input_discards_pending_bytes() {
        let (host, mut device) = duplex(1024);
        let mut config = fast_config();
        config.forced_version = Some(ProtocolVersion::V1);
        let session = Session::with_config(StreamTransport::new(host), config);

        device.write_all(b"junk$M>").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(session.flush_input().await.unwrap(), 7);
    }
}
