//! Waypoint type and its 21-byte wire layout.
//!
//! ```text
//! ┌───────┬────────┬─────────┬─────────┬─────────┬────┬────┬────┬──────┐
//! │ index │ action │ lat i32 │ lon i32 │ alt i32 │ p1 │ p2 │ p3 │ flag │
//! │  u8   │   u8   │  1e-7°  │  1e-7°  │   cm    │i16 │i16 │i16 │  u8  │
//! └───────┴────────┴─────────┴─────────┴─────────┴────┴────┴────┴──────┘
//! ```
//!
//! All multi-byte fields are little-endian.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Size of an encoded waypoint including its index byte.
pub const WAYPOINT_WIRE_SIZE: usize = 21;

/// Flag value marking the last waypoint of a mission.
pub const FLAG_LAST: u8 = 0xA5;

/// Degrees to wire units.
const DEGREE_SCALE: f64 = 1e7;

/// Metres to wire units.
const ALTITUDE_SCALE: f64 = 100.0;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;
/// Lowest accepted altitude in metres.
pub const MIN_ALTITUDE_M: f64 = -1000.0;
/// Highest accepted altitude in metres.
pub const MAX_ALTITUDE_M: f64 = 10000.0;

/// Waypoint action codes (iNav numbering).
pub mod action {
    pub const WAYPOINT: u8 = 1;
    pub const POSHOLD_UNLIM: u8 = 2;
    pub const POSHOLD_TIME: u8 = 3;
    pub const RTH: u8 = 4;
    pub const SET_POI: u8 = 5;
    pub const JUMP: u8 = 6;
    pub const SET_HEAD: u8 = 7;
    pub const LAND: u8 = 8;
}

/// One mission waypoint in wire units.
///
/// The index is not stored: it is the waypoint's position in the mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub action: u8,
    /// Latitude in 1e-7 degrees.
    pub lat: i32,
    /// Longitude in 1e-7 degrees.
    pub lon: i32,
    /// Altitude in centimetres.
    pub alt: i32,
    /// Speed in cm/s for `WAYPOINT`, hold time for `POSHOLD_TIME`, and so on.
    #[serde(default)]
    pub p1: i16,
    #[serde(default)]
    pub p2: i16,
    #[serde(default)]
    pub p3: i16,
    #[serde(default)]
    pub flag: u8,
}

impl Waypoint {
    pub fn new(action: u8, lat: i32, lon: i32, alt: i32) -> Self {
        Self {
            action,
            lat,
            lon,
            alt,
            p1: 0,
            p2: 0,
            p3: 0,
            flag: 0,
        }
    }

    /// Build from degrees and metres.
    ///
    /// Values are cast with saturation; NaN becomes 0. Use
    /// [`try_from_degrees`](Self::try_from_degrees) for untrusted input.
    pub fn from_degrees(action: u8, lat: f64, lon: f64, alt_m: f64) -> Self {
        Self::new(
            action,
            (lat * DEGREE_SCALE).round() as i32,
            (lon * DEGREE_SCALE).round() as i32,
            (alt_m * ALTITUDE_SCALE).round() as i32,
        )
    }

    /// Build from degrees and metres, rejecting NaN and out-of-range values.
    pub fn try_from_degrees(action: u8, lat: f64, lon: f64, alt_m: f64) -> Result<Self, String> {
        validate_coordinates(lat, lon, alt_m)?;
        Ok(Self::from_degrees(action, lat, lon, alt_m))
    }

    /// Set the first parameter (speed for plain waypoints).
    pub fn with_p1(mut self, p1: i16) -> Self {
        self.p1 = p1;
        self
    }

    pub fn with_params(mut self, p1: i16, p2: i16, p3: i16) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self.p3 = p3;
        self
    }

    pub fn latitude(&self) -> f64 {
        self.lat as f64 / DEGREE_SCALE
    }

    pub fn longitude(&self) -> f64 {
        self.lon as f64 / DEGREE_SCALE
    }

    /// Altitude in metres.
    pub fn altitude(&self) -> f64 {
        self.alt as f64 / ALTITUDE_SCALE
    }

    pub fn is_last(&self) -> bool {
        self.flag == FLAG_LAST
    }

    /// Check the coordinate ranges.
    pub fn validate(&self) -> Result<(), String> {
        validate_coordinates(self.latitude(), self.longitude(), self.altitude())
    }

    /// Encode as an `MSP_SET_WP` payload for `index`.
    pub fn encode(&self, index: u8) -> [u8; WAYPOINT_WIRE_SIZE] {
        let mut out = [0u8; WAYPOINT_WIRE_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(index);
        buf.put_u8(self.action);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
        buf.put_i16_le(self.p1);
        buf.put_i16_le(self.p2);
        buf.put_i16_le(self.p3);
        buf.put_u8(self.flag);
        out
    }

    /// Decode an `MSP_WP` reply into its index and waypoint.
    ///
    /// Returns `None` if fewer than 21 bytes are given. Extra bytes are
    /// ignored.
    pub fn decode(payload: &[u8]) -> Option<(u8, Self)> {
        if payload.len() < WAYPOINT_WIRE_SIZE {
            return None;
        }
        let mut buf = &payload[..WAYPOINT_WIRE_SIZE];
        let index = buf.get_u8();
        let waypoint = Self {
            action: buf.get_u8(),
            lat: buf.get_i32_le(),
            lon: buf.get_i32_le(),
            alt: buf.get_i32_le(),
            p1: buf.get_i16_le(),
            p2: buf.get_i16_le(),
            p3: buf.get_i16_le(),
            flag: buf.get_u8(),
        };
        Some((index, waypoint))
    }
}

/// Check latitude/longitude in degrees and altitude in metres.
///
/// NaN fails every range check.
pub fn validate_coordinates(lat: f64, lon: f64, alt_m: f64) -> Result<(), String> {
    if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        return Err(format!("latitude {lat} out of range"));
    }
    if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lon) {
        return Err(format!("longitude {lon} out of range"));
    }
    if !(MIN_ALTITUDE_M..=MAX_ALTITUDE_M).contains(&alt_m) {
        return Err(format!("altitude {alt_m} m out of range"));
    }
    Ok(())
}

/// Great-circle distance in metres.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}
