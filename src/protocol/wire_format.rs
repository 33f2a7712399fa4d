//! Wire format encoding and decoding.
//!
//! MSP v1 frame:
//! ```text
//! ┌─────┬─────┬─────┬──────┬──────┬───────────┬─────┐
//! │ '$' │ 'M' │ dir │ len  │ cmd  │ payload   │ xor │
//! │     │     │     │ u8   │ u8   │ len bytes │ u8  │
//! └─────┴─────┴─────┴──────┴──────┴───────────┴─────┘
//! ```
//! A v1 payload of 255 bytes or more uses the jumbo layout: `len` is 255,
//! followed by `cmd` and the real length as `u16` little-endian. This is the
//! order Betaflight and iNav transmit; the length does not precede `cmd`.
//!
//! MSP v2 frame:
//! ```text
//! ┌─────┬─────┬─────┬──────┬─────────┬─────────┬───────────┬──────┐
//! │ '$' │ 'X' │ dir │ flag │ cmd     │ len     │ payload   │ crc8 │
//! │     │     │     │ u8   │ u16 LE  │ u16 LE  │ len bytes │ u8   │
//! └─────┴─────┴─────┴──────┴─────────┴─────────┴───────────┴──────┘
//! ```
//!
//! The v1 checksum is the XOR of every byte after the preamble; the v2 CRC is
//! CRC-8/DVB-S2 over every byte after the preamble.

use std::fmt;

use thiserror::Error;

/// First preamble byte for both versions.
pub const PREAMBLE_START: u8 = b'$';

/// Second preamble byte for v1 frames.
pub const V1_MARKER: u8 = b'M';

/// Second preamble byte for v2 frames.
pub const V2_MARKER: u8 = b'X';

/// `'$'` + version marker + direction.
pub const PREAMBLE_SIZE: usize = 3;

/// Preamble + length + command.
pub const V1_HEADER_SIZE: usize = 5;

/// Preamble + 255 marker + command + u16 length.
pub const V1_JUMBO_HEADER_SIZE: usize = 7;

/// Preamble + flag + u16 command + u16 length.
pub const V2_HEADER_SIZE: usize = 8;

/// Trailing checksum byte.
pub const CHECKSUM_SIZE: usize = 1;

/// Length byte value announcing a jumbo v1 frame.
pub const JUMBO_FRAME_MARKER: u8 = 255;

/// Largest payload a plain (non-jumbo) v1 frame carries.
pub const V1_MAX_PLAIN_PAYLOAD: usize = 254;

/// Largest command code representable in v1.
pub const V1_MAX_COMMAND: u16 = 255;

/// Largest payload either version can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// CRC-8/DVB-S2 polynomial.
pub const CRC8_DVB_S2_POLY: u8 = 0xD5;

/// Who sent the frame and what it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device (`'<'`).
    Request,
    /// Device reply (`'>'`).
    Response,
    /// Device could not process the command (`'!'`).
    Error,
}

impl Direction {
    /// Wire byte for this direction.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }

    /// Parse a direction byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }
}

/// MSP wire format variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    /// Second preamble byte.
    #[inline]
    pub fn marker(self) -> u8 {
        match self {
            ProtocolVersion::V1 => V1_MARKER,
            ProtocolVersion::V2 => V2_MARKER,
        }
    }

    /// Parse the second preamble byte.
    #[inline]
    pub fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            V1_MARKER => Some(ProtocolVersion::V1),
            V2_MARKER => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    /// Whether `command` fits this version's command field.
    #[inline]
    pub fn supports_command(self, command: u16) -> bool {
        match self {
            ProtocolVersion::V1 => command <= V1_MAX_COMMAND,
            ProtocolVersion::V2 => true,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V2 => f.write_str("v2"),
        }
    }
}

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptFrame {
    /// Trailing checksum does not match the recomputed one.
    #[error("checksum mismatch: expected {expected:#04x}, received {received:#04x}")]
    ChecksumMismatch { expected: u8, received: u8 },

    /// Bytes do not start with `$M`/`$X` and a direction byte.
    #[error("invalid preamble")]
    InvalidPreamble,

    /// Declared payload length is above the accepted maximum.
    #[error("declared payload length {declared} exceeds maximum {max}")]
    Oversized { declared: usize, max: usize },

    /// Buffer ends before the frame does.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Buffer holds bytes past the end of the frame.
    #[error("{extra} trailing bytes after frame")]
    TrailingBytes { extra: usize },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Wire format of this frame.
    pub version: ProtocolVersion,
    /// Frame direction.
    pub direction: Direction,
    /// v2 flag byte, always 0 for v1.
    pub flags: u8,
    /// Command code.
    pub command: u16,
    /// Payload length in bytes.
    pub payload_length: usize,
}

impl Header {
    /// Create a new header with zero flags.
    pub fn new(
        version: ProtocolVersion,
        direction: Direction,
        command: u16,
        payload_length: usize,
    ) -> Self {
        Self {
            version,
            direction,
            flags: 0,
            command,
            payload_length,
        }
    }

    /// Whether this is a jumbo v1 header.
    #[inline]
    pub fn is_jumbo(&self) -> bool {
        self.version == ProtocolVersion::V1 && self.payload_length > V1_MAX_PLAIN_PAYLOAD
    }

    /// Encoded header size, including the preamble.
    #[inline]
    pub fn header_len(&self) -> usize {
        match self.version {
            ProtocolVersion::V1 if self.is_jumbo() => V1_JUMBO_HEADER_SIZE,
            ProtocolVersion::V1 => V1_HEADER_SIZE,
            ProtocolVersion::V2 => V2_HEADER_SIZE,
        }
    }

    /// Total frame size: header, payload and checksum.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.header_len() + self.payload_length + CHECKSUM_SIZE
    }

    /// Append the encoded header to `buf`.
    ///
    /// Callers guarantee the command and length fit the version.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(PREAMBLE_START);
        buf.push(self.version.marker());
        buf.push(self.direction.as_byte());
        match self.version {
            ProtocolVersion::V1 if self.is_jumbo() => {
                buf.push(JUMBO_FRAME_MARKER);
                buf.push(self.command as u8);
                buf.extend_from_slice(&(self.payload_length as u16).to_le_bytes());
            }
            ProtocolVersion::V1 => {
                buf.push(self.payload_length as u8);
                buf.push(self.command as u8);
            }
            ProtocolVersion::V2 => {
                buf.push(self.flags);
                buf.extend_from_slice(&self.command.to_le_bytes());
                buf.extend_from_slice(&(self.payload_length as u16).to_le_bytes());
            }
        }
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` is a valid prefix but too short to hold the
    /// whole header.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, CorruptFrame> {
        let Some((version, direction)) = parse_preamble(buf)? else {
            return Ok(None);
        };

        match version {
            ProtocolVersion::V1 => {
                if buf.len() < V1_HEADER_SIZE {
                    return Ok(None);
                }
                let length = buf[3];
                let command = buf[4] as u16;
                let payload_length = if length == JUMBO_FRAME_MARKER {
                    if buf.len() < V1_JUMBO_HEADER_SIZE {
                        return Ok(None);
                    }
                    u16::from_le_bytes([buf[5], buf[6]]) as usize
                } else {
                    length as usize
                };
                Ok(Some(Self {
                    version,
                    direction,
                    flags: 0,
                    command,
                    payload_length,
                }))
            }
            ProtocolVersion::V2 => {
                if buf.len() < V2_HEADER_SIZE {
                    return Ok(None);
                }
                Ok(Some(Self {
                    version,
                    direction,
                    flags: buf[3],
                    command: u16::from_le_bytes([buf[4], buf[5]]),
                    payload_length: u16::from_le_bytes([buf[6], buf[7]]) as usize,
                }))
            }
        }
    }

    /// Size of the header as it appeared on the wire.
    ///
    /// Differs from [`header_len`](Self::header_len) only for a jumbo v1 frame
    /// carrying fewer than 255 bytes, which some firmware emits.
    pub(crate) fn wire_header_len(&self, buf: &[u8]) -> usize {
        match self.version {
            ProtocolVersion::V1 if buf[3] == JUMBO_FRAME_MARKER => V1_JUMBO_HEADER_SIZE,
            ProtocolVersion::V1 => V1_HEADER_SIZE,
            ProtocolVersion::V2 => V2_HEADER_SIZE,
        }
    }
}

/// Validate the preamble at the start of `buf`.
///
/// Returns `Ok(None)` when fewer than [`PREAMBLE_SIZE`] bytes are present but
/// those present are a valid prefix.
pub fn parse_preamble(buf: &[u8]) -> Result<Option<(ProtocolVersion, Direction)>, CorruptFrame> {
    if !is_preamble_prefix(buf) {
        return Err(CorruptFrame::InvalidPreamble);
    }
    if buf.len() < PREAMBLE_SIZE {
        return Ok(None);
    }
    let version = ProtocolVersion::from_marker(buf[1]).ok_or(CorruptFrame::InvalidPreamble)?;
    let direction = Direction::from_byte(buf[2]).ok_or(CorruptFrame::InvalidPreamble)?;
    Ok(Some((version, direction)))
}

/// Whether `buf` (up to three bytes considered) could begin a preamble.
pub fn is_preamble_prefix(buf: &[u8]) -> bool {
    match buf {
        [] => true,
        [PREAMBLE_START] => true,
        [PREAMBLE_START, marker] => ProtocolVersion::from_marker(*marker).is_some(),
        [PREAMBLE_START, marker, dir, ..] => {
            ProtocolVersion::from_marker(*marker).is_some() && Direction::from_byte(*dir).is_some()
        }
        _ => false,
    }
}

/// MSP v1 checksum: XOR of all bytes.
#[inline]
pub fn checksum_v1(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// Feed one byte into a running CRC-8/DVB-S2.
#[inline]
pub fn crc8_dvb_s2(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_DVB_S2_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// MSP v2 checksum: CRC-8/DVB-S2 of all bytes, initial value 0.
#[inline]
pub fn checksum_v2(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| crc8_dvb_s2(crc, b))
}

/// Checksum for the bytes between preamble and checksum byte.
#[inline]
pub fn checksum(version: ProtocolVersion, covered: &[u8]) -> u8 {
    match version {
        ProtocolVersion::V1 => checksum_v1(covered),
        ProtocolVersion::V2 => checksum_v2(covered),
    }
}
