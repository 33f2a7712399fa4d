//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the MSP frame codec:
//! - v1 / jumbo v1 / v2 header encoding and decoding
//! - XOR and CRC-8/DVB-S2 checksums
//! - Frame buffer for reassembling frames from a fragmented, noisy stream

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{decode, encode, Frame};
pub use frame_buffer::{FrameBuffer, FrameResult};
pub use wire_format::{
    checksum, checksum_v1, checksum_v2, crc8_dvb_s2, is_preamble_prefix, parse_preamble,
    CorruptFrame, Direction, Header, ProtocolVersion, CHECKSUM_SIZE, JUMBO_FRAME_MARKER,
    MAX_PAYLOAD_SIZE, PREAMBLE_SIZE, V1_HEADER_SIZE, V1_JUMBO_HEADER_SIZE, V1_MAX_COMMAND,
    V1_MAX_PLAIN_PAYLOAD, V2_HEADER_SIZE,
};
