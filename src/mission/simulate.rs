//! Pre-flight feasibility check for a mission plan.
//!
//! Walks the legs of a plan and estimates flight time and battery use from
//! per-leg speed (`p1`, cm/s) and the vehicle climb rate. Waypoint 0 is
//! treated as home.

use serde::{Deserialize, Serialize};

use super::plan::MissionPlan;
use super::waypoint::haversine_distance;

/// Leg speed when a waypoint carries no `p1`.
const DEFAULT_LEG_SPEED_MS: f64 = 5.0;

/// Share of flight time spent hovering or manoeuvring at full current.
const HOVER_SHARE: f64 = 0.3;

/// Cruise current relative to hover current.
const CRUISE_CURRENT_RATIO: f64 = 0.8;

/// Vehicle limits used by [`MissionPlan::simulate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpecs {
    pub max_speed_ms: f64,
    pub max_climb_rate_ms: f64,
    pub battery_capacity_mah: f64,
    /// Current draw while hovering, in amps.
    pub hover_current_a: f64,
    /// Battery fraction that must remain at landing.
    pub reserve_fraction: f64,
    /// Waypoints above this altitude are flagged.
    pub altitude_limit_m: f64,
    /// Waypoints further than this from home are flagged (line of sight).
    pub max_range_m: f64,
}

impl Default for VehicleSpecs {
    fn default() -> Self {
        Self {
            max_speed_ms: 15.0,
            max_climb_rate_ms: 5.0,
            battery_capacity_mah: 5000.0,
            hover_current_a: 15.0,
            reserve_fraction: 0.2,
            altitude_limit_m: 120.0,
            max_range_m: 500.0,
        }
    }
}

/// Outcome of a simulated mission run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationReport {
    /// False when any error was found.
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub estimated_time_s: f64,
    /// Battery used, as a percentage of capacity.
    pub estimated_battery_pct: f64,
    pub max_distance_from_home_m: f64,
    pub total_distance_m: f64,
}

impl MissionPlan {
    /// Estimate time, battery and range for flying this plan with `specs`.
    pub fn simulate(&self, specs: &VehicleSpecs) -> SimulationReport {
        let mut report = SimulationReport {
            valid: true,
            ..Default::default()
        };

        let waypoints = self.waypoints();
        let Some(home) = waypoints.first() else {
            report.errors.push("mission has no waypoints".to_string());
            report.valid = false;
            return report;
        };

        for (index, wp) in waypoints.iter().enumerate() {
            if wp.altitude() > specs.altitude_limit_m {
                report.warnings.push(format!(
                    "waypoint {index}: altitude {:.1} m exceeds {:.0} m",
                    wp.altitude(),
                    specs.altitude_limit_m
                ));
            }

            let distance =
                haversine_distance(home.latitude(), home.longitude(), wp.latitude(), wp.longitude());
            report.max_distance_from_home_m = report.max_distance_from_home_m.max(distance);
            if distance > specs.max_range_m {
                report.warnings.push(format!(
                    "waypoint {index}: {distance:.0} m from home exceeds {:.0} m",
                    specs.max_range_m
                ));
            }
        }

        for leg in waypoints.windows(2) {
            let (from, to) = (&leg[0], &leg[1]);
            let horizontal =
                haversine_distance(from.latitude(), from.longitude(), to.latitude(), to.longitude());
            let vertical = (to.altitude() - from.altitude()).abs();

            let speed = if to.p1 > 0 {
                f64::from(to.p1) / 100.0
            } else {
                DEFAULT_LEG_SPEED_MS
            }
            .min(specs.max_speed_ms);

            let leg_time = (horizontal / speed).max(vertical / specs.max_climb_rate_ms);
            report.estimated_time_s += leg_time;
            report.total_distance_m += horizontal;
        }

        let hover_s = report.estimated_time_s * HOVER_SHARE;
        let cruise_s = report.estimated_time_s - hover_s;
        let amp_seconds = specs.hover_current_a * (hover_s + cruise_s * CRUISE_CURRENT_RATIO);
        let used_mah = amp_seconds / 3600.0 * 1000.0;
        report.estimated_battery_pct = used_mah / specs.battery_capacity_mah * 100.0;

        let usable_pct = (1.0 - specs.reserve_fraction) * 100.0;
        if report.estimated_battery_pct > usable_pct {
            report.errors.push(format!(
                "mission needs {:.1}% battery, more than the usable {:.0}%",
                report.estimated_battery_pct, usable_pct
            ));
            report.valid = false;
        }

        tracing::debug!(
            time_s = report.estimated_time_s,
            battery_pct = report.estimated_battery_pct,
            warnings = report.warnings.len(),
            "Mission simulated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::waypoint::{action, Waypoint};

    fn plan(points: &[(f64, f64, f64, i16)]) -> MissionPlan {
        let waypoints = points
            .iter()
            .map(|&(lat, lon, alt, speed)| {
                Waypoint::from_degrees(action::WAYPOINT, lat, lon, alt).with_p1(speed)
            })
            .collect();
        MissionPlan::from_waypoints(waypoints).unwrap()
    }

    #[test]
    fn test_default_specs() {
        let specs = VehicleSpecs::default();
        assert_eq!(specs.max_speed_ms, 15.0);
        assert_eq!(specs.max_climb_rate_ms, 5.0);
        assert_eq!(specs.battery_capacity_mah, 5000.0);
        assert_eq!(specs.reserve_fraction, 0.2);
    }

    #[test]
    fn test_empty_plan_is_invalid() {
        let report = MissionPlan::new().simulate(&VehicleSpecs::default());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_time_and_battery_estimate() {
        let p = plan(&[(47.0, 8.0, 30.0, 0), (47.003, 8.0, 30.0, 1000)]);
        let (a, b) = (&p.waypoints()[0], &p.waypoints()[1]);
        let leg = haversine_distance(a.latitude(), a.longitude(), b.latitude(), b.longitude());

        let report = p.simulate(&VehicleSpecs::default());
        assert!(report.valid);
        assert!((report.total_distance_m - leg).abs() < 1e-6);
        // 10 m/s leg speed
        assert!((report.estimated_time_s - leg / 10.0).abs() < 1e-6);

        let t = leg / 10.0;
        let expected_mah = 15.0 * (0.3 * t + 0.7 * t * 0.8) / 3.6;
        assert!((report.estimated_battery_pct - expected_mah / 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_speed_capped_and_climb_limited() {
        // 50 m/s requested, capped at 15 m/s.
        let fast = plan(&[(47.0, 8.0, 30.0, 0), (47.01, 8.0, 30.0, 5000)]);
        let report = fast.simulate(&VehicleSpecs::default());
        assert!((report.estimated_time_s - report.total_distance_m / 15.0).abs() < 1e-6);

        // Pure climb of 100 m at 5 m/s.
        let climb = plan(&[(47.0, 8.0, 0.0, 0), (47.0, 8.0, 100.0, 0)]);
        let report = climb.simulate(&VehicleSpecs::default());
        assert!((report.estimated_time_s - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_altitude_and_range_warnings() {
        let p = plan(&[(47.0, 8.0, 30.0, 500), (47.01, 8.0, 150.0, 500)]);
        let report = p.simulate(&VehicleSpecs::default());

        assert!(report.valid);
        assert!(report.max_distance_from_home_m > 1000.0);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(|w| w.starts_with("waypoint 1")));
    }

    #[test]
    fn test_long_mission_exceeds_reserve() {
        // About 111 km at the default 5 m/s.
        let p = plan(&[(47.0, 8.0, 30.0, 0), (48.0, 8.0, 30.0, 0)]);
        let report = p.simulate(&VehicleSpecs::default());

        assert!(!report.valid);
        assert!(report.estimated_battery_pct > 80.0);
        assert!(report.errors[0].contains("battery"));
    }
}
