//! Editable mission plans and mission files.
//!
//! A [`MissionPlan`] is a host-side waypoint list with the same capacity and
//! coordinate checks the transfer applies. Plans are stored as JSON:
//!
//! ```json
//! { "version": "1.0", "created": 1760000000, "waypoints": [...], "summary": {...} }
//! ```

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::MissionError;
use crate::session::Session;
use crate::transport::Transport;

use super::transfer::{download, upload_with, MissionConfig, DEFAULT_MAX_WAYPOINTS};
use super::waypoint::{action, haversine_distance, validate_coordinates, Waypoint};

/// Mission file format version written by [`MissionPlan::save`].
pub const MISSION_FILE_VERSION: &str = "1.0";

/// Approximate metres per degree of latitude.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Statistics over a plan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MissionSummary {
    pub waypoint_count: usize,
    /// Sum of great-circle legs between consecutive waypoints.
    pub total_distance_m: f64,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub altitude_range_m: f64,
}

/// On-disk mission file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionFile {
    pub version: String,
    /// Unix time in seconds.
    pub created: u64,
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub summary: Option<MissionSummary>,
}

/// Rectangular lawn-mower survey parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurveyArea {
    pub center_lat: f64,
    pub center_lon: f64,
    /// East-west extent in metres; lines are spaced across it.
    pub width_m: f64,
    /// North-south extent in metres.
    pub height_m: f64,
    pub altitude_m: f64,
    pub line_spacing_m: f64,
    /// Leg speed in cm/s.
    pub speed: i16,
}

impl SurveyArea {
    pub fn new(center_lat: f64, center_lon: f64, width_m: f64, height_m: f64, altitude_m: f64) -> Self {
        Self {
            center_lat,
            center_lon,
            width_m,
            height_m,
            altitude_m,
            line_spacing_m: 50.0,
            speed: 500,
        }
    }
}

/// Ordered, validated list of waypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    waypoints: Vec<Waypoint>,
    max_waypoints: usize,
}

impl MissionPlan {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_WAYPOINTS)
    }

    /// Plan holding at most `max_waypoints`.
    pub fn with_limit(max_waypoints: usize) -> Self {
        Self {
            waypoints: Vec::new(),
            max_waypoints,
        }
    }

    /// Build a plan from existing waypoints, validating each one.
    pub fn from_waypoints(waypoints: Vec<Waypoint>) -> Result<Self, MissionError> {
        let mut plan = Self::new();
        for waypoint in waypoints {
            plan.add(waypoint)?;
        }
        Ok(plan)
    }

    /// Waypoints through `coords` (lat, lon, alt m), then RTH at the last one.
    pub fn simple_route(coords: &[(f64, f64, f64)], speed: i16) -> Result<Self, MissionError> {
        let mut plan = Self::new();
        for (index, &(lat, lon, alt)) in coords.iter().enumerate() {
            let waypoint = degrees(index, action::WAYPOINT, lat, lon, alt)?;
            plan.add(waypoint.with_p1(speed))?;
        }
        if let Some(&(lat, lon, alt)) = coords.last() {
            plan.add(degrees(plan.len(), action::RTH, lat, lon, alt)?)?;
        }
        tracing::info!(count = plan.len(), "Created simple mission");
        Ok(plan)
    }

    /// Parallel survey lines across `area`, then RTH at its centre.
    pub fn survey(area: SurveyArea) -> Result<Self, MissionError> {
        let sized = |v: f64| v.is_finite() && v >= 0.0;
        if !(sized(area.line_spacing_m) && area.line_spacing_m > 0.0)
            || !sized(area.width_m)
            || !sized(area.height_m)
        {
            return Err(MissionError::InvalidWaypoint {
                index: 0,
                reason: "survey needs positive spacing and non-negative size".to_string(),
            });
        }
        validate_coordinates(area.center_lat, area.center_lon, area.altitude_m)
            .map_err(|reason| MissionError::InvalidWaypoint { index: 0, reason })?;

        let lat_per_metre = 1.0 / METRES_PER_DEGREE;
        let lon_per_metre = 1.0 / (METRES_PER_DEGREE * area.center_lat.to_radians().cos());
        let half_width = area.width_m / 2.0;
        let half_height = area.height_m / 2.0;
        let lines = (area.width_m / area.line_spacing_m) as usize + 1;

        let mut plan = Self::new();
        for line in 0..lines {
            let lon = area.center_lon + (-half_width + line as f64 * area.line_spacing_m) * lon_per_metre;
            // Alternate direction so consecutive lines join at the same edge.
            let ends = if line % 2 == 0 {
                [-half_height, half_height]
            } else {
                [half_height, -half_height]
            };
            for y in ends {
                let lat = area.center_lat + y * lat_per_metre;
                let waypoint = degrees(plan.len(), action::WAYPOINT, lat, lon, area.altitude_m)?;
                plan.add(waypoint.with_p1(area.speed))?;
            }
        }
        plan.add(degrees(
            plan.len(),
            action::RTH,
            area.center_lat,
            area.center_lon,
            area.altitude_m,
        )?)?;

        tracing::info!(
            lines,
            count = plan.len(),
            "Created {}x{} m survey mission",
            area.width_m,
            area.height_m
        );
        Ok(plan)
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn into_waypoints(self) -> Vec<Waypoint> {
        self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn max_waypoints(&self) -> usize {
        self.max_waypoints
    }

    /// Append a waypoint.
    pub fn add(&mut self, waypoint: Waypoint) -> Result<(), MissionError> {
        let index = self.waypoints.len();
        self.check_insert(index, &waypoint)?;
        self.waypoints.push(waypoint);
        Ok(())
    }

    /// Insert a waypoint at `index`, shifting later ones.
    pub fn insert(&mut self, index: usize, waypoint: Waypoint) -> Result<(), MissionError> {
        if index > self.waypoints.len() {
            return Err(MissionError::InvalidWaypoint {
                index,
                reason: format!("index past end of {}-waypoint mission", self.waypoints.len()),
            });
        }
        self.check_insert(index, &waypoint)?;
        self.waypoints.insert(index, waypoint);
        Ok(())
    }

    /// Remove and return the waypoint at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Waypoint> {
        (index < self.waypoints.len()).then(|| self.waypoints.remove(index))
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
    }

    fn check_insert(&self, index: usize, waypoint: &Waypoint) -> Result<(), MissionError> {
        if self.waypoints.len() >= self.max_waypoints {
            return Err(MissionError::TooManyWaypoints {
                count: self.waypoints.len() + 1,
                max: self.max_waypoints,
            });
        }
        waypoint
            .validate()
            .map_err(|reason| MissionError::InvalidWaypoint { index, reason })
    }

    pub fn summary(&self) -> MissionSummary {
        let Some(first) = self.waypoints.first() else {
            return MissionSummary::default();
        };

        let mut min_alt = first.altitude();
        let mut max_alt = first.altitude();
        let mut total = 0.0;
        for pair in self.waypoints.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            total += haversine_distance(a.latitude(), a.longitude(), b.latitude(), b.longitude());
            min_alt = min_alt.min(b.altitude());
            max_alt = max_alt.max(b.altitude());
        }

        MissionSummary {
            waypoint_count: self.waypoints.len(),
            total_distance_m: total,
            min_altitude_m: min_alt,
            max_altitude_m: max_alt,
            altitude_range_m: max_alt - min_alt,
        }
    }

    /// Write the plan as a JSON mission file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MissionError> {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file = MissionFile {
            version: MISSION_FILE_VERSION.to_string(),
            created,
            waypoints: self.waypoints.clone(),
            summary: Some(self.summary()),
        };
        fs::write(path.as_ref(), serde_json::to_string_pretty(&file)?)?;
        tracing::info!(path = %path.as_ref().display(), count = self.len(), "Mission saved");
        Ok(())
    }

    /// Read a mission file. Waypoints are validated as they are added.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MissionError> {
        let text = fs::read_to_string(path.as_ref())?;
        let file: MissionFile = serde_json::from_str(&text)?;
        let plan = Self::from_waypoints(file.waypoints)?;
        tracing::info!(path = %path.as_ref().display(), count = plan.len(), "Mission loaded");
        Ok(plan)
    }

    /// Upload and commit this plan.
    pub async fn upload<T: Transport>(
        &self,
        session: &Session<T>,
        persist: bool,
    ) -> Result<(), MissionError> {
        let config = MissionConfig {
            max_waypoints: self.max_waypoints,
            persist,
            ..Default::default()
        };
        upload_with(session, &self.waypoints, config).await
    }

    /// Replace this plan with the device mission.
    pub async fn download<T: Transport>(session: &Session<T>) -> Result<Self, MissionError> {
        let waypoints = download(session).await?;
        Ok(Self {
            waypoints,
            max_waypoints: DEFAULT_MAX_WAYPOINTS,
        })
    }
}

/// Validated waypoint from degrees; `index` is reported on failure.
fn degrees(
    index: usize,
    action: u8,
    lat: f64,
    lon: f64,
    alt_m: f64,
) -> Result<Waypoint, MissionError> {
    Waypoint::try_from_degrees(action, lat, lon, alt_m)
        .map_err(|reason| MissionError::InvalidWaypoint { index, reason })
}

impl Default for MissionPlan {
    fn default() -> Self {
        Self::new()
    }
}
