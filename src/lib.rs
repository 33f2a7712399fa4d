//! # msp-client
//!
//! Host-side protocol engine for MSP, the command/response protocol spoken
//! by iNav, Betaflight and related flight-controller firmware.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): v1, jumbo v1 and v2 frames with XOR and
//!   CRC-8/DVB-S2 checksums, plus a reassembler for noisy serial streams
//! - **Session** ([`Session`]): one request in flight at a time, response
//!   matching, timeouts with retries, and automatic v1/v2 negotiation
//! - **Missions** ([`mission`]): sequential waypoint upload/download with
//!   per-index acknowledgment and a verified commit
//!
//! The crate never opens serial ports itself. Hand it any tokio byte stream
//! (or your own [`transport::Transport`]) and it does the rest. Logging goes
//! through `tracing`; installing a subscriber is up to the application.
//!
//! ## Example
//!
//! ```no_run
//! use msp_client::mission::{self, MissionPlan};
//! use msp_client::{command, Session};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::builder().connect_stream(port).await?;
//!
//! let status = session.request(command::MSP_STATUS, &[]).await?;
//! println!("status: {} bytes over MSP {}", status.len(), session.negotiated_version());
//!
//! let plan = MissionPlan::simple_route(&[(47.397, 8.545, 50.0), (47.398, 8.546, 60.0)], 500)?;
//! mission::upload(&session, plan.waypoints()).await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod mission;
pub mod protocol;
pub mod transport;

mod diagnostics;
mod session;

pub use diagnostics::{CommandStats, SessionStats};
pub use error::{MissionError, MspError, Result};
pub use protocol::{Direction, Frame, ProtocolVersion};
pub use session::{
    NegotiatedVersion, RetryPolicy, Session, SessionBuilder, SessionConfig, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT,
};
