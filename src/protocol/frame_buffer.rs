//! Frame buffer for reassembling frames from a noisy byte stream.
//!
//! Uses `bytes::BytesMut` for buffer management. Serial links deliver
//! frames split at arbitrary points and mixed with line noise, so the buffer
//! runs a small scan/parse state machine:
//! - `Scanning`: looking for `$M` / `$X` followed by a direction byte
//! - `Framing`: preamble found at the buffer head, waiting for the full frame
//!
//! Corruption is reported as an `Err` item in the output rather than as a
//! failure of `push`: a bad checksum is normal on a serial line.
//!
//! # Example
//!
//! ```
//! use msp_client::protocol::{encode, Direction, FrameBuffer, ProtocolVersion};
//!
//! let bytes = encode(Direction::Response, 108, &[0; 6], ProtocolVersion::V1).unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&bytes[..4]).is_empty());
//! let results = buffer.push(&bytes[4..]);
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].as_ref().unwrap().command(), 108);
//! ```

use bytes::{Buf, BytesMut};

use super::frame::{parse, Frame};
use super::wire_format::{
    is_preamble_prefix, CorruptFrame, MAX_PAYLOAD_SIZE, PREAMBLE_SIZE, PREAMBLE_START,
};

/// One reassembly result: a valid frame or a rejected candidate.
pub type FrameResult = std::result::Result<Frame, CorruptFrame>;

/// State machine for frame scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No preamble at the buffer head.
    Scanning,
    /// Buffer head holds a preamble, frame incomplete.
    Framing,
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Never performs I/O and never emits the same frame twice.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current scanning state.
    state: State,
    /// Maximum accepted declared payload length.
    max_payload_size: usize,
    /// Noise bytes dropped while scanning.
    discarded: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting any payload the wire allows.
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Create a frame buffer that rejects larger declared payloads.
    ///
    /// A false preamble inside noise can declare a huge length; a tight limit
    /// stops it from holding up real frames behind it.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            state: State::Scanning,
            max_payload_size,
            discarded: 0,
        }
    }

    /// Push data into the buffer and extract every complete result.
    ///
    /// Returns frames and corruption signals in stream order. Partial data is
    /// kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<FrameResult> {
        self.buffer.extend_from_slice(data);

        let mut results = Vec::new();
        while let Some(result) = self.try_extract_one() {
            results.push(result);
        }
        results
    }

    /// Try to extract a single result from the buffer.
    ///
    /// Returns `None` when more data is needed.
    fn try_extract_one(&mut self) -> Option<FrameResult> {
        loop {
            match self.state {
                State::Scanning => {
                    if !self.sync_to_preamble() {
                        return None;
                    }
                    self.state = State::Framing;
                }
                State::Framing => {
                    return match parse(&self.buffer, self.max_payload_size) {
                        Ok(Some((frame, consumed))) => {
                            self.buffer.advance(consumed);
                            self.state = State::Scanning;
                            tracing::trace!(
                                command = frame.command(),
                                len = frame.payload().len(),
                                "frame reassembled"
                            );
                            Some(Ok(frame))
                        }
                        Ok(None) => None,
                        Err(corrupt) => {
                            // Skip only the preamble: a false match in noise
                            // must not swallow a real frame that follows.
                            let skip = PREAMBLE_SIZE.min(self.buffer.len());
                            self.buffer.advance(skip);
                            self.discarded += skip as u64;
                            self.state = State::Scanning;
                            tracing::debug!(error = %corrupt, "dropping corrupt frame candidate");
                            Some(Err(corrupt))
                        }
                    };
                }
            }
        }
    }

    /// Drop bytes until the buffer starts with a full preamble.
    ///
    /// Returns `false` if no full preamble is buffered. In that case only a
    /// tail that could start a preamble split across reads (at most
    /// `PREAMBLE_SIZE - 1` bytes) is kept.
    fn sync_to_preamble(&mut self) -> bool {
        let mut pos = 0;
        while pos < self.buffer.len() {
            if self.buffer[pos] == PREAMBLE_START {
                let candidate = &self.buffer[pos..];
                if candidate.len() >= PREAMBLE_SIZE && is_preamble_prefix(candidate) {
                    self.discard(pos);
                    return true;
                }
                if candidate.len() < PREAMBLE_SIZE && is_preamble_prefix(candidate) {
                    self.discard(pos);
                    return false;
                }
            }
            pos += 1;
        }
        self.discard(pos);
        false
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            self.buffer.advance(count);
            self.discarded += count as u64;
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total noise bytes discarded so far.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.discarded += self.buffer.len() as u64;
        self.buffer.clear();
        self.state = State::Scanning;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Scanning => "Scanning",
            State::Framing => "Framing",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
