//! Error types for msp-client.

use thiserror::Error;

use crate::protocol::{CorruptFrame, ProtocolVersion};

/// Main error type for framing and session operations.
#[derive(Debug, Error)]
pub enum MspError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (mission files, stats export).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame bytes failed validation.
    ///
    /// The session absorbs these while waiting for a response; callers only
    /// see this from the standalone `decode` function.
    #[error("corrupt frame: {0}")]
    Corrupt(#[from] CorruptFrame),

    /// Command code cannot be represented in the selected wire format.
    #[error("command {command} cannot be sent as MSP {version}")]
    UnsupportedCommandForVersion {
        command: u16,
        version: ProtocolVersion,
    },

    /// Payload exceeds what the wire format can carry.
    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Device answered with an error frame for this command.
    #[error("device rejected command {0}")]
    DeviceRejected(u16),

    /// No matching response after all attempts.
    #[error("timed out waiting for command {command} after {attempts} attempts")]
    Timeout { command: u16, attempts: u32 },

    /// Transport was closed, by us or by the device side.
    #[error("transport closed")]
    TransportClosed,

    /// Response payload does not have the layout the command requires.
    #[error("malformed payload for command {command}: {reason}")]
    MalformedPayload { command: u16, reason: String },
}

/// Result type alias using MspError.
pub type Result<T> = std::result::Result<T, MspError>;

/// Errors raised by the mission layer.
///
/// `last_good` is the highest index the device acknowledged before the
/// failure, or `None` if nothing was acknowledged. After an upload error the
/// mission stored on the device is indeterminate.
#[derive(Debug, Error)]
pub enum MissionError {
    /// Device acknowledged a different index than the one requested.
    #[error("index mismatch: expected {expected}, device reported {got}")]
    IndexMismatch {
        expected: usize,
        got: usize,
        last_good: Option<usize>,
    },

    /// Device refused the waypoint operation.
    #[error("device rejected waypoint {index}")]
    Rejected {
        index: usize,
        last_good: Option<usize>,
    },

    /// Waypoint read back after its write differs from what was sent.
    #[error("waypoint {index} failed read-back verification: {reason}")]
    VerifyFailed {
        index: usize,
        reason: String,
        last_good: Option<usize>,
    },

    /// Mission info after upload does not match what was sent.
    #[error("mission commit failed: {0}")]
    CommitFailed(String),

    /// Nothing to upload.
    #[error("mission has no waypoints")]
    EmptyMission,

    /// Mission exceeds the device waypoint capacity.
    #[error("mission has {count} waypoints, maximum is {max}")]
    TooManyWaypoints { count: usize, max: usize },

    /// Waypoint failed coordinate validation.
    #[error("waypoint {index} is invalid: {reason}")]
    InvalidWaypoint { index: usize, reason: String },

    /// Transfer job already committed or aborted.
    #[error("transfer job already finished")]
    JobFinished,

    /// Session-level failure while transferring.
    #[error("session error at waypoint {index:?}: {source}")]
    Session {
        index: Option<usize>,
        last_good: Option<usize>,
        #[source]
        source: MspError,
    },

    /// Mission file could not be read or written.
    #[error("mission file error: {0}")]
    File(#[from] std::io::Error),

    /// Mission file contents are not valid JSON for a mission.
    #[error("mission file format error: {0}")]
    Format(#[from] serde_json::Error),
}

impl MissionError {
    /// Last index acknowledged by the device before this error, if known.
    pub fn last_good(&self) -> Option<usize> {
        match self {
            MissionError::IndexMismatch { last_good, .. }
            | MissionError::Rejected { last_good, .. }
            | MissionError::VerifyFailed { last_good, .. }
            | MissionError::Session { last_good, .. } => *last_good,
            _ => None,
        }
    }
}
