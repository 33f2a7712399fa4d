//! Frame struct and the encode/decode entry points.
//!
//! A [`Frame`] is immutable: its command and payload length are checked
//! against the wire format when it is built, so every frame can be encoded.
//!
//! # Example
//!
//! ```
//! use msp_client::protocol::{decode, encode, Direction, ProtocolVersion};
//!
//! let bytes = encode(Direction::Request, 108, b"", ProtocolVersion::V1).unwrap();
//! assert_eq!(bytes, b"$M<\x00\x6c\x6c");
//!
//! let frame = decode(&bytes).unwrap();
//! assert_eq!(frame.command(), 108);
//! assert!(frame.payload().is_empty());
//! ```

use bytes::Bytes;

use super::wire_format::{
    checksum, CorruptFrame, Direction, Header, ProtocolVersion, CHECKSUM_SIZE, MAX_PAYLOAD_SIZE,
    PREAMBLE_SIZE,
};
use crate::error::{MspError, Result};

/// One complete MSP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    version: ProtocolVersion,
    direction: Direction,
    flags: u8,
    command: u16,
    payload: Bytes,
}

impl Frame {
    /// Build a frame, checking the command range and payload length.
    pub fn new(
        direction: Direction,
        command: u16,
        payload: impl Into<Bytes>,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let payload = payload.into();
        validate(command, payload.len(), version)?;
        Ok(Self {
            version,
            direction,
            flags: 0,
            command,
            payload,
        })
    }

    /// Build a request frame.
    pub fn request(command: u16, payload: impl Into<Bytes>, version: ProtocolVersion) -> Result<Self> {
        Self::new(Direction::Request, command, payload, version)
    }

    /// Build a response frame.
    pub fn response(command: u16, payload: impl Into<Bytes>, version: ProtocolVersion) -> Result<Self> {
        Self::new(Direction::Response, command, payload, version)
    }

    /// Set the v2 flag byte. Ignored on the wire for v1.
    pub fn with_flags(mut self, flags: u8) -> Self {
        if self.version == ProtocolVersion::V2 {
            self.flags = flags;
        }
        self
    }

    /// Header describing this frame.
    pub fn header(&self) -> Header {
        Header {
            version: self.version,
            direction: self.direction,
            flags: self.flags,
            command: self.command,
            payload_length: self.payload.len(),
        }
    }

    /// Wire format of this frame.
    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Frame direction.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// v2 flag byte (0 for v1).
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Command code.
    #[inline]
    pub fn command(&self) -> u16 {
        self.command
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as `Bytes` (cheap clone).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Consume the frame, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.direction == Direction::Error
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut buf = Vec::with_capacity(header.frame_len());
        header.encode_into(&mut buf);
        buf.extend_from_slice(&self.payload);
        let crc = checksum(self.version, &buf[PREAMBLE_SIZE..]);
        buf.push(crc);
        buf
    }

    /// Decode exactly one frame occupying all of `buf`.
    pub fn decode(buf: &[u8]) -> std::result::Result<Self, CorruptFrame> {
        match parse(buf, MAX_PAYLOAD_SIZE)? {
            Some((frame, consumed)) if consumed == buf.len() => Ok(frame),
            Some((_, consumed)) => Err(CorruptFrame::TrailingBytes {
                extra: buf.len() - consumed,
            }),
            None => Err(CorruptFrame::Truncated {
                needed: needed_len(buf),
                available: buf.len(),
            }),
        }
    }
}

/// Encode a frame straight to wire bytes.
pub fn encode(
    direction: Direction,
    command: u16,
    payload: &[u8],
    version: ProtocolVersion,
) -> Result<Vec<u8>> {
    Ok(Frame::new(direction, command, Bytes::copy_from_slice(payload), version)?.encode())
}

/// Decode a complete frame from wire bytes.
pub fn decode(buf: &[u8]) -> Result<Frame> {
    Frame::decode(buf).map_err(MspError::from)
}

fn validate(command: u16, payload_len: usize, version: ProtocolVersion) -> Result<()> {
    if !version.supports_command(command) {
        return Err(MspError::UnsupportedCommandForVersion { command, version });
    }
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(MspError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

/// Try to parse one frame at the start of `buf`.
///
/// - `Ok(Some((frame, consumed)))`: a valid frame of `consumed` bytes
/// - `Ok(None)`: `buf` is a valid prefix, more bytes are needed
/// - `Err(..)`: the bytes at the start of `buf` are not a valid frame
pub(crate) fn parse(
    buf: &[u8],
    max_payload: usize,
) -> std::result::Result<Option<(Frame, usize)>, CorruptFrame> {
    let Some(header) = Header::decode(buf)? else {
        return Ok(None);
    };

    if header.payload_length > max_payload {
        return Err(CorruptFrame::Oversized {
            declared: header.payload_length,
            max: max_payload,
        });
    }

    let header_len = header.wire_header_len(buf);
    let body_end = header_len + header.payload_length;
    let frame_len = body_end + CHECKSUM_SIZE;
    if buf.len() < frame_len {
        return Ok(None);
    }

    let expected = checksum(header.version, &buf[PREAMBLE_SIZE..body_end]);
    let received = buf[body_end];
    if expected != received {
        return Err(CorruptFrame::ChecksumMismatch { expected, received });
    }

    let frame = Frame {
        version: header.version,
        direction: header.direction,
        flags: header.flags,
        command: header.command,
        payload: Bytes::copy_from_slice(&buf[header_len..body_end]),
    };
    Ok(Some((frame, frame_len)))
}

/// Bytes required before `buf` could be parsed, for error reporting.
fn needed_len(buf: &[u8]) -> usize {
    match Header::decode(buf) {
        Ok(Some(header)) => header.wire_header_len(buf) + header.payload_length + CHECKSUM_SIZE,
        _ => PREAMBLE_SIZE.max(buf.len() + 1),
    }
}
