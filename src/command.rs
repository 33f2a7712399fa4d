//! MSP command codes.
//!
//! Codes 0-255 are shared by v1 and v2; codes above 255 exist only in v2.
//! Payload schemas for most commands are left to callers; the engine itself
//! uses the API version and waypoint commands.

use crate::error::{MspError, Result};

pub const MSP_API_VERSION: u16 = 1;
pub const MSP_FC_VARIANT: u16 = 2;
pub const MSP_FC_VERSION: u16 = 3;
pub const MSP_BOARD_INFO: u16 = 4;
pub const MSP_BUILD_INFO: u16 = 5;

/// Persist the uploaded mission to EEPROM (iNav).
pub const MSP_WP_MISSION_SAVE: u16 = 19;
/// Waypoint capacity, validity and count (iNav).
pub const MSP_WP_GETINFO: u16 = 20;

pub const MSP_FEATURE: u16 = 36;
pub const MSP_SET_FEATURE: u16 = 37;
pub const MSP_STATUS: u16 = 101;
pub const MSP_RAW_IMU: u16 = 102;
pub const MSP_SERVO: u16 = 103;
pub const MSP_MOTOR: u16 = 104;
pub const MSP_RC: u16 = 105;
pub const MSP_RAW_GPS: u16 = 106;
pub const MSP_COMP_GPS: u16 = 107;
pub const MSP_ATTITUDE: u16 = 108;
pub const MSP_ALTITUDE: u16 = 109;
pub const MSP_ANALOG: u16 = 110;
pub const MSP_RC_TUNING: u16 = 111;
pub const MSP_PID: u16 = 112;
pub const MSP_MISC: u16 = 114;
pub const MSP_BOXNAMES: u16 = 116;
pub const MSP_PIDNAMES: u16 = 117;
/// Read one waypoint.
pub const MSP_WP: u16 = 118;
pub const MSP_BOXIDS: u16 = 119;
pub const MSP_NAV_STATUS: u16 = 121;
pub const MSP_BATTERY_STATE: u16 = 130;
pub const MSP_STATUS_EX: u16 = 150;
pub const MSP_UID: u16 = 160;
pub const MSP_SET_RAW_RC: u16 = 200;
pub const MSP_SET_PID: u16 = 202;
pub const MSP_ACC_CALIBRATION: u16 = 205;
pub const MSP_MAG_CALIBRATION: u16 = 206;
pub const MSP_RESET_CONF: u16 = 208;
/// Write one waypoint.
pub const MSP_SET_WP: u16 = 209;
pub const MSP_SELECT_SETTING: u16 = 210;
pub const MSP_SET_MOTOR: u16 = 214;
pub const MSP_EEPROM_WRITE: u16 = 250;

pub const MSP2_COMMON_SETTING: u16 = 0x1003;
pub const MSP2_COMMON_SET_SETTING: u16 = 0x1004;
pub const MSP2_COMMON_MOTOR_MIXER: u16 = 0x1005;
pub const MSP2_COMMON_SET_MOTOR_MIXER: u16 = 0x1006;
pub const MSP2_INAV_STATUS: u16 = 0x2000;
pub const MSP2_INAV_OPTICAL_FLOW: u16 = 0x2001;
pub const MSP2_INAV_ANALOG: u16 = 0x2002;
pub const MSP2_INAV_MISC: u16 = 0x2003;
pub const MSP2_INAV_SET_MISC: u16 = 0x2004;
pub const MSP2_INAV_BATTERY_CONFIG: u16 = 0x2005;
pub const MSP2_INAV_SET_BATTERY_CONFIG: u16 = 0x2006;
pub const MSP2_INAV_AIR_SPEED: u16 = 0x2009;
pub const MSP2_BETAFLIGHT_BIND: u16 = 0x3000;

/// First firmware API version that understands MSP v2 framing.
pub const MIN_V2_API_VERSION: (u8, u8) = (1, 41);

/// Reply to [`MSP_API_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    /// MSP protocol revision byte.
    pub protocol: u8,
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    /// Decode the 3-byte reply payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        match payload {
            [protocol, major, minor, ..] => Ok(Self {
                protocol: *protocol,
                major: *major,
                minor: *minor,
            }),
            _ => Err(MspError::MalformedPayload {
                command: MSP_API_VERSION,
                reason: format!("expected 3 bytes, got {}", payload.len()),
            }),
        }
    }

    /// Whether firmware reporting this API version accepts v2 frames.
    pub fn supports_v2(&self) -> bool {
        (self.major, self.minor) >= MIN_V2_API_VERSION
    }
}
