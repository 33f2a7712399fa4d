//! Integration tests for msp-client.
//!
//! These tests exercise the public codec and reassembler API together.

use bytes::{Buf, BufMut};
use msp_client::protocol::{
    decode, encode, CorruptFrame, Direction, Frame, FrameBuffer, ProtocolVersion, V1_HEADER_SIZE,
};
use msp_client::MspError;

/// Test a typed telemetry payload through encode, reassembly and decode.
#[test]
fn test_frame_with_attitude_payload() {
    let (roll, pitch, yaw) = (-123i16, 45i16, 270i16);
    let mut payload = Vec::new();
    payload.put_i16_le(roll);
    payload.put_i16_le(pitch);
    payload.put_i16_le(yaw);

    let bytes = encode(Direction::Response, 108, &payload, ProtocolVersion::V1).unwrap();

    let mut buffer = FrameBuffer::new();
    let results = buffer.push(&bytes);
    assert_eq!(results.len(), 1);
    let frame = results.into_iter().next().unwrap().unwrap();

    assert_eq!(frame.command(), 108);
    assert!(frame.is_response());

    let mut body = frame.payload();
    assert_eq!(body.get_i16_le(), roll);
    assert_eq!(body.get_i16_le(), pitch);
    assert_eq!(body.get_i16_le(), yaw);
}

/// Test multiple frames of both versions in sequence.
#[test]
fn test_multiple_frames_sequence() {
    let mut all_bytes = Vec::new();
    for i in 1u16..=5 {
        let version = if i % 2 == 0 {
            ProtocolVersion::V2
        } else {
            ProtocolVersion::V1
        };
        let payload = format!("message_{}", i);
        all_bytes.extend(encode(Direction::Response, 100 + i, payload.as_bytes(), version).unwrap());
    }

    let mut buffer = FrameBuffer::new();
    let frames: Vec<Frame> = buffer.push(&all_bytes).into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(frames.len(), 5);

    for (i, frame) in frames.iter().enumerate() {
        let n = i as u16 + 1;
        assert_eq!(frame.command(), 100 + n);
        assert_eq!(frame.payload(), format!("message_{}", n).as_bytes());
        let expected = if n % 2 == 0 {
            ProtocolVersion::V2
        } else {
            ProtocolVersion::V1
        };
        assert_eq!(frame.version(), expected);
    }
}

/// Test error frame pattern.
#[test]
fn test_error_response() {
    let bytes = encode(Direction::Error, 209, &[], ProtocolVersion::V1).unwrap();
    assert_eq!(&bytes[..3], b"$M!");

    let frame = decode(&bytes).unwrap();
    assert!(frame.is_error());
    assert!(!frame.is_response());
    assert_eq!(frame.command(), 209);
    assert!(frame.payload().is_empty());
}

/// Test v2 flags survive decoding.
#[test]
fn test_v2_flags_preserved() {
    let frame = Frame::request(0x1003, &b"name"[..], ProtocolVersion::V2)
        .unwrap()
        .with_flags(0x01);
    let decoded = decode(&frame.encode()).unwrap();
    assert_eq!(decoded.flags(), 0x01);
    assert_eq!(decoded, frame);
}

/// Test standalone decode rejects damaged input.
#[test]
fn test_decode_errors() {
    let mut bytes = encode(Direction::Response, 101, b"status", ProtocolVersion::V2).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x10;
    assert!(matches!(
        decode(&bytes),
        Err(MspError::Corrupt(CorruptFrame::ChecksumMismatch { .. }))
    ));

    let short = encode(Direction::Response, 101, b"status", ProtocolVersion::V1).unwrap();
    assert!(matches!(
        decode(&short[..short.len() - 2]),
        Err(MspError::Corrupt(CorruptFrame::Truncated { .. }))
    ));

    assert!(matches!(
        decode(b"hello"),
        Err(MspError::Corrupt(CorruptFrame::InvalidPreamble))
    ));
}

/// Test encode refuses frames the wire cannot carry.
#[test]
fn test_encode_limits() {
    assert!(matches!(
        encode(Direction::Request, 300, &[], ProtocolVersion::V1),
        Err(MspError::UnsupportedCommandForVersion { command: 300, .. })
    ));
    assert!(encode(Direction::Request, 300, &[], ProtocolVersion::V2).is_ok());

    let huge = vec![0u8; 65536];
    assert!(matches!(
        encode(Direction::Request, 1, &huge, ProtocolVersion::V2),
        Err(MspError::PayloadTooLarge { size: 65536, .. })
    ));
}

/// Test fragmented frame parsing.
#[test]
fn test_fragmented_frame_parsing() {
    let payload = b"test data for fragmentation";
    let bytes = encode(Direction::Response, 116, payload, ProtocolVersion::V1).unwrap();

    let mut buffer = FrameBuffer::new();

    // Header in parts
    assert!(buffer.push(&bytes[..2]).is_empty());
    assert!(buffer.push(&bytes[2..V1_HEADER_SIZE]).is_empty());

    // Payload in parts
    let mid = V1_HEADER_SIZE + payload.len() / 2;
    assert!(buffer.push(&bytes[V1_HEADER_SIZE..mid]).is_empty());

    // Final part completes the frame
    let results = buffer.push(&bytes[mid..]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap().payload(), payload);
}

/// Test a noisy line with one corrupted frame between two good ones.
#[test]
fn test_noisy_line_recovers() {
    let good_a = encode(Direction::Response, 105, &[1; 16], ProtocolVersion::V1).unwrap();
    let mut bad = encode(Direction::Response, 106, &[2; 16], ProtocolVersion::V2).unwrap();
    bad[10] ^= 0x40;
    let good_b = encode(Direction::Response, 107, &[3; 16], ProtocolVersion::V1).unwrap();

    let mut line = b"\r\n\x00boot".to_vec();
    line.extend(&good_a);
    line.extend(b"$");
    line.extend(&bad);
    line.extend(&good_b);

    let mut buffer = FrameBuffer::new();
    let mut results = Vec::new();
    for chunk in line.chunks(7) {
        results.extend(buffer.push(chunk));
    }

    let commands: Vec<u16> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|f| f.command())
        .collect();
    assert_eq!(commands, vec![105, 107]);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CorruptFrame::ChecksumMismatch { .. }))));
}
