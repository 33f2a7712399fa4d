//! Mission module - waypoint missions on top of a session.
//!
//! - [`Waypoint`]: the 21-byte waypoint record and action codes
//! - [`MissionTransferJob`]: sequential upload/download with per-index
//!   acknowledgment and a verified commit
//! - [`MissionPlan`]: host-side editing, survey generation and mission files
//! - [`MissionPlan::simulate`]: flight time, battery and range estimate

mod plan;
mod simulate;
mod transfer;
mod waypoint;

pub use plan::{MissionFile, MissionPlan, MissionSummary, SurveyArea, MISSION_FILE_VERSION};
pub use simulate::{SimulationReport, VehicleSpecs};
pub use transfer::{
    download, mission_info, upload, upload_with, AbortReason, JobStatus, MissionConfig,
    MissionInfo, MissionTransferJob, TransferDirection, DEFAULT_MAX_WAYPOINTS,
};
pub use waypoint::{
    action, haversine_distance, validate_coordinates, Waypoint, FLAG_LAST, MAX_ALTITUDE_M,
    MAX_LATITUDE, MAX_LONGITUDE, MIN_ALTITUDE_M, MIN_LATITUDE, MIN_LONGITUDE, WAYPOINT_WIRE_SIZE,
};
