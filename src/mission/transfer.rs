//! Mission transfer state machine.
//!
//! Uploads and downloads are strictly sequential: one waypoint per request,
//! and the cursor moves only after the device acknowledged that index (and,
//! with [`MissionConfig::verify`], returned it intact on read-back).
//! Any failure aborts the job for good. After an aborted upload the mission
//! stored on the device is indeterminate; callers re-upload from scratch.

use std::fmt;

use crate::command::{MSP_SET_WP, MSP_WP, MSP_WP_GETINFO, MSP_WP_MISSION_SAVE};
use crate::error::{MissionError, MspError};
use crate::session::Session;
use crate::transport::Transport;

use super::waypoint::{Waypoint, FLAG_LAST, WAYPOINT_WIRE_SIZE};

/// Default device waypoint capacity.
pub const DEFAULT_MAX_WAYPOINTS: usize = 60;

/// Largest read-back difference in latitude/longitude units (1e-6 degrees).
const COORDINATE_TOLERANCE: u32 = 10;

/// Largest read-back difference in altitude units (10 cm).
const ALTITUDE_TOLERANCE: u32 = 10;

/// Mission transfer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionConfig {
    /// Largest mission accepted for upload or download.
    pub max_waypoints: usize,
    /// Reject out-of-range coordinates before sending anything.
    pub validate_coordinates: bool,
    /// Read each waypoint back with `MSP_WP` after it is acknowledged.
    pub verify: bool,
    /// Issue `MSP_WP_MISSION_SAVE` after a verified upload.
    pub persist: bool,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            max_waypoints: DEFAULT_MAX_WAYPOINTS,
            validate_coordinates: true,
            verify: true,
            persist: false,
        }
    }
}

/// Reply to `MSP_WP_GETINFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionInfo {
    /// Device waypoint capacity.
    pub max_waypoints: u8,
    /// Whether the stored list ends with a last-flagged waypoint.
    pub valid: bool,
    pub count: u8,
}

impl MissionInfo {
    /// Decode `reserved, max, valid, count`.
    pub fn decode(payload: &[u8]) -> Result<Self, MspError> {
        match payload {
            [_, max_waypoints, valid, count, ..] => Ok(Self {
                max_waypoints: *max_waypoints,
                valid: *valid != 0,
                count: *count,
            }),
            _ => Err(MspError::MalformedPayload {
                command: MSP_WP_GETINFO,
                reason: format!("expected 4 bytes, got {}", payload.len()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Why a job stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    IndexMismatch { expected: usize, got: usize },
    Rejected { index: usize },
    VerifyFailed { index: usize },
    CommitFailed,
    /// Session error, rendered as text.
    Session(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::IndexMismatch { expected, got } => {
                write!(f, "index mismatch (expected {expected}, got {got})")
            }
            AbortReason::Rejected { index } => write!(f, "waypoint {index} rejected"),
            AbortReason::VerifyFailed { index } => write!(f, "waypoint {index} failed verification"),
            AbortReason::CommitFailed => f.write_str("commit failed"),
            AbortReason::Session(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Committed,
    Aborted(AbortReason),
}

/// A waypoint mission transfer in one direction.
///
/// # Example
///
/// ```no_run
/// use msp_client::mission::{action, JobStatus, MissionTransferJob, Waypoint};
/// # async fn run<T: msp_client::transport::Transport>(session: msp_client::Session<T>) {
/// let mut job = MissionTransferJob::upload(vec![
///     Waypoint::from_degrees(action::WAYPOINT, 47.39, 8.54, 50.0),
///     Waypoint::from_degrees(action::RTH, 47.39, 8.54, 50.0),
/// ]);
///
/// if let Err(e) = job.run(&session).await {
///     eprintln!("stopped after {} waypoints: {e}", job.cursor());
/// }
/// assert!(matches!(job.status(), JobStatus::Committed | JobStatus::Aborted(_)));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MissionTransferJob {
    direction: TransferDirection,
    items: Vec<Waypoint>,
    cursor: usize,
    status: JobStatus,
    config: MissionConfig,
}

impl MissionTransferJob {
    /// Job uploading `waypoints` in order.
    pub fn upload(waypoints: Vec<Waypoint>) -> Self {
        Self::new(TransferDirection::Upload, waypoints)
    }

    /// Job downloading the device mission.
    pub fn download() -> Self {
        Self::new(TransferDirection::Download, Vec::new())
    }

    fn new(direction: TransferDirection, items: Vec<Waypoint>) -> Self {
        Self {
            direction,
            items,
            cursor: 0,
            status: JobStatus::InProgress,
            config: MissionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Waypoints to upload, or those downloaded so far.
    pub fn items(&self) -> &[Waypoint] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Waypoint> {
        self.items
    }

    /// Number of waypoints acknowledged by the device.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Highest acknowledged index.
    pub fn last_good(&self) -> Option<usize> {
        self.cursor.checked_sub(1)
    }

    /// Drive the job to completion.
    ///
    /// Returns `JobFinished` if the job was already committed or aborted.
    pub async fn run<T: Transport>(&mut self, session: &Session<T>) -> Result<(), MissionError> {
        if self.status != JobStatus::InProgress {
            return Err(MissionError::JobFinished);
        }

        let result = match self.direction {
            TransferDirection::Upload => self.run_upload(session).await,
            TransferDirection::Download => self.run_download(session).await,
        };

        match &result {
            Ok(()) => self.status = JobStatus::Committed,
            Err(err) => {
                let reason = abort_reason(err);
                tracing::warn!(
                    direction = ?self.direction,
                    cursor = self.cursor,
                    "Mission transfer aborted: {}",
                    reason
                );
                self.status = JobStatus::Aborted(reason);
            }
        }
        result
    }

    fn check_mission(&self) -> Result<(), MissionError> {
        if self.items.is_empty() {
            return Err(MissionError::EmptyMission);
        }
        // Indices travel as a single byte.
        let max = self.config.max_waypoints.min(u8::MAX as usize + 1);
        if self.items.len() > max {
            return Err(MissionError::TooManyWaypoints {
                count: self.items.len(),
                max,
            });
        }
        if self.config.validate_coordinates {
            for (index, waypoint) in self.items.iter().enumerate() {
                waypoint
                    .validate()
                    .map_err(|reason| MissionError::InvalidWaypoint { index, reason })?;
            }
        }
        Ok(())
    }

    async fn run_upload<T: Transport>(&mut self, session: &Session<T>) -> Result<(), MissionError> {
        self.check_mission()?;

        let total = self.items.len();
        tracing::info!(total, "Uploading mission");

        while self.cursor < total {
            let index = self.cursor;
            let mut waypoint = self.items[index];
            waypoint.flag = if index + 1 == total { FLAG_LAST } else { 0 };

            let ack = session
                .request(MSP_SET_WP, &waypoint.encode(index as u8))
                .await
                .map_err(|e| self.session_error(index, e))?;

            // Empty ack means "accepted what you sent"; otherwise it must
            // echo the index.
            if let Some(&got) = ack.first() {
                if got as usize != index {
                    return Err(MissionError::IndexMismatch {
                        expected: index,
                        got: got as usize,
                        last_good: self.last_good(),
                    });
                }
            }

            if self.config.verify {
                self.verify(session, index, &waypoint).await?;
            }

            self.cursor += 1;
            tracing::debug!(index, total, "Waypoint acknowledged");
        }

        self.commit(session).await
    }

    /// Read `index` back and compare it with what was written.
    async fn verify<T: Transport>(
        &self,
        session: &Session<T>,
        index: usize,
        sent: &Waypoint,
    ) -> Result<(), MissionError> {
        let stored = self.read_waypoint(session, index).await?;

        let reason = if stored.action != sent.action {
            Some(format!("action {} != {}", stored.action, sent.action))
        } else if stored.lat.abs_diff(sent.lat) > COORDINATE_TOLERANCE
            || stored.lon.abs_diff(sent.lon) > COORDINATE_TOLERANCE
        {
            Some(format!(
                "position ({}, {}) != ({}, {})",
                stored.lat, stored.lon, sent.lat, sent.lon
            ))
        } else if stored.alt.abs_diff(sent.alt) > ALTITUDE_TOLERANCE {
            Some(format!("altitude {} cm != {} cm", stored.alt, sent.alt))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(MissionError::VerifyFailed {
                index,
                reason,
                last_good: self.last_good(),
            }),
            None => Ok(()),
        }
    }

    /// Fetch one waypoint with `MSP_WP`, checking the echoed index.
    async fn read_waypoint<T: Transport>(
        &self,
        session: &Session<T>,
        index: usize,
    ) -> Result<Waypoint, MissionError> {
        let reply = session
            .request(MSP_WP, &[index as u8])
            .await
            .map_err(|e| self.session_error(index, e))?;

        let (got, waypoint) = Waypoint::decode(&reply).ok_or_else(|| {
            self.session_error(
                index,
                MspError::MalformedPayload {
                    command: MSP_WP,
                    reason: format!(
                        "expected {} bytes, got {}",
                        WAYPOINT_WIRE_SIZE,
                        reply.len()
                    ),
                },
            )
        })?;

        if got as usize != index {
            return Err(MissionError::IndexMismatch {
                expected: index,
                got: got as usize,
                last_good: self.last_good(),
            });
        }
        Ok(waypoint)
    }

    /// Verify the device holds exactly the uploaded mission.
    async fn commit<T: Transport>(&mut self, session: &Session<T>) -> Result<(), MissionError> {
        let info = mission_info(session)
            .await
            .map_err(|e| match e {
                MissionError::Session { source, .. } => self.session_error_at(None, source),
                other => other,
            })?;

        let expected = self.items.len();
        if !info.valid {
            return Err(MissionError::CommitFailed(
                "device reports mission invalid".to_string(),
            ));
        }
        if info.count as usize != expected {
            return Err(MissionError::CommitFailed(format!(
                "device holds {} waypoints, uploaded {}",
                info.count, expected
            )));
        }

        if self.config.persist {
            session
                .request(MSP_WP_MISSION_SAVE, &[0])
                .await
                .map_err(|e| match e {
                    MspError::DeviceRejected(_) => {
                        MissionError::CommitFailed("device refused to save mission".to_string())
                    }
                    other => self.session_error_at(None, other),
                })?;
        }

        tracing::info!(count = expected, persisted = self.config.persist, "Mission committed");
        Ok(())
    }

    async fn run_download<T: Transport>(
        &mut self,
        session: &Session<T>,
    ) -> Result<(), MissionError> {
        let info = mission_info(session).await?;
        let total = info.count as usize;
        if total > self.config.max_waypoints {
            return Err(MissionError::TooManyWaypoints {
                count: total,
                max: self.config.max_waypoints,
            });
        }
        tracing::info!(total, "Downloading mission");

        while self.cursor < total {
            let index = self.cursor;
            let waypoint = self.read_waypoint(session, index).await?;
            self.items.push(waypoint);
            self.cursor += 1;
            tracing::debug!(index, total, "Waypoint downloaded");
        }

        Ok(())
    }

    fn session_error(&self, index: usize, err: MspError) -> MissionError {
        match err {
            MspError::DeviceRejected(_) => MissionError::Rejected {
                index,
                last_good: self.last_good(),
            },
            other => self.session_error_at(Some(index), other),
        }
    }

    fn session_error_at(&self, index: Option<usize>, source: MspError) -> MissionError {
        MissionError::Session {
            index,
            last_good: self.last_good(),
            source,
        }
    }
}

fn abort_reason(err: &MissionError) -> AbortReason {
    match err {
        MissionError::IndexMismatch { expected, got, .. } => AbortReason::IndexMismatch {
            expected: *expected,
            got: *got,
        },
        MissionError::Rejected { index, .. } => AbortReason::Rejected { index: *index },
        MissionError::VerifyFailed { index, .. } => AbortReason::VerifyFailed { index: *index },
        MissionError::CommitFailed(_) => AbortReason::CommitFailed,
        other => AbortReason::Session(other.to_string()),
    }
}

/// Query the device mission state.
pub async fn mission_info<T: Transport>(session: &Session<T>) -> Result<MissionInfo, MissionError> {
    let wrap = |source| MissionError::Session {
        index: None,
        last_good: None,
        source,
    };
    let reply = session.request(MSP_WP_GETINFO, &[]).await.map_err(wrap)?;
    MissionInfo::decode(&reply).map_err(wrap)
}

/// Upload `waypoints` with the default configuration and verify the result.
pub async fn upload<T: Transport>(
    session: &Session<T>,
    waypoints: &[Waypoint],
) -> Result<(), MissionError> {
    upload_with(session, waypoints, MissionConfig::default()).await
}

pub async fn upload_with<T: Transport>(
    session: &Session<T>,
    waypoints: &[Waypoint],
    config: MissionConfig,
) -> Result<(), MissionError> {
    MissionTransferJob::upload(waypoints.to_vec())
        .with_config(config)
        .run(session)
        .await
}

/// Download the device mission.
pub async fn download<T: Transport>(session: &Session<T>) -> Result<Vec<Waypoint>, MissionError> {
    let mut job = MissionTransferJob::download();
    job.run(session).await?;
    Ok(job.into_items())
}
