//! Mission upload - plan a survey and upload it to a loopback device.
//!
//! This example demonstrates:
//! - Building a survey mission with `MissionPlan`
//! - Connecting a session over a tokio byte stream
//! - Estimating flight time and battery use before uploading
//! - Uploading with per-waypoint acknowledgment, read-back and a verified commit
//! - Exporting session statistics as JSON
//!
//! A real program would pass a serial port stream (for example from
//! `tokio-serial`) to `connect_stream` instead of the in-process device.

use msp_client::command::{MSP_API_VERSION, MSP_SET_WP, MSP_WP, MSP_WP_GETINFO};
use msp_client::mission::{MissionPlan, SurveyArea, VehicleSpecs, Waypoint, FLAG_LAST};
use msp_client::protocol::{encode, Direction, FrameBuffer};
use msp_client::Session;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Minimal iNav-like responder: version probe, waypoint writes and
/// read-backs, mission info.
async fn loopback_device(mut port: DuplexStream) {
    let mut frames = FrameBuffer::new();
    let mut mission: Vec<Waypoint> = Vec::new();
    let mut buf = [0u8; 256];

    while let Ok(n) = port.read(&mut buf).await {
        if n == 0 {
            return;
        }
        for frame in frames.push(&buf[..n]).into_iter().flatten() {
            let payload = match frame.command() {
                MSP_API_VERSION => vec![0, 2, 5],
                MSP_SET_WP => match Waypoint::decode(frame.payload()) {
                    Some((index, wp)) => {
                        mission.truncate(index as usize);
                        mission.push(wp);
                        vec![index]
                    }
                    None => continue,
                },
                MSP_WP => match frame.payload().first() {
                    Some(&index) => match mission.get(index as usize) {
                        Some(wp) => wp.encode(index).to_vec(),
                        None => continue,
                    },
                    None => continue,
                },
                MSP_WP_GETINFO => {
                    let valid = mission.last().is_some_and(|wp| wp.flag == FLAG_LAST);
                    vec![0, 60, valid as u8, mission.len() as u8]
                }
                _ => Vec::new(),
            };
            let Ok(reply) = encode(Direction::Response, frame.command(), &payload, frame.version())
            else {
                continue;
            };
            if port.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, device) = tokio::io::duplex(1024);
    tokio::spawn(loopback_device(device));

    let session = Session::builder().connect_stream(host).await?;
    println!("negotiated MSP {}", session.negotiated_version());

    let plan = MissionPlan::survey(SurveyArea::new(47.3977, 8.5456, 200.0, 150.0, 40.0))?;
    let summary = plan.summary();
    println!(
        "survey: {} waypoints, {:.0} m",
        summary.waypoint_count, summary.total_distance_m
    );

    let report = plan.simulate(&VehicleSpecs::default());
    println!(
        "estimate: {:.0} s, {:.1}% battery, {:.0} m from home, {} warnings",
        report.estimated_time_s,
        report.estimated_battery_pct,
        report.max_distance_from_home_m,
        report.warnings.len()
    );

    plan.upload(&session, false).await?;
    println!("mission committed");

    println!("{}", session.stats().to_json()?);
    session.disconnect().await?;
    Ok(())
}
