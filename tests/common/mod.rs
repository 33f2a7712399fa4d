//! Simulated flight controller for integration tests.
//!
//! Runs on the far side of a `tokio::io::duplex` pipe, logs every request it
//! parses, and answers according to a [`Behavior`] that can inject faults.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msp_client::command::{MSP_API_VERSION, MSP_SET_WP, MSP_WP, MSP_WP_GETINFO, MSP_WP_MISSION_SAVE};
use msp_client::mission::{Waypoint, FLAG_LAST};
use msp_client::protocol::{encode, Direction, Frame, FrameBuffer, ProtocolVersion};
use msp_client::transport::StreamTransport;
use msp_client::{Session, SessionBuilder};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type TestSession = Session<StreamTransport<DuplexStream>>;

/// Short timeout so retry tests stay fast.
pub const TIMEOUT: Duration = Duration::from_millis(50);

/// Per-index fault for `MSP_SET_WP` / `MSP_WP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpFault {
    Silent,
    Reject,
    /// Acknowledge with this index instead of the requested one.
    Echo(u8),
    /// Acknowledge normally but store the waypoint shifted north.
    Misstore,
}

#[derive(Debug, Clone)]
pub struct Behavior {
    /// `MSP_API_VERSION` reply: protocol, major, minor.
    pub api_version: [u8; 3],
    /// Answer the version probe in a v2 frame.
    pub api_reply_v2: bool,
    pub silent: HashSet<u16>,
    /// Ignore the first N requests of a command.
    pub drop_first: HashMap<u16, usize>,
    pub reject: HashSet<u16>,
    /// Fixed reply payloads for other commands.
    pub canned: HashMap<u16, Vec<u8>>,
    pub wp_faults: HashMap<u8, WpFault>,
    /// Acknowledge `MSP_SET_WP` with an empty payload.
    pub empty_acks: bool,
    pub info_override: Option<[u8; 4]>,
    pub mission: Vec<Waypoint>,
    pub reply_delay: Duration,
    pub noise_before_reply: Vec<u8>,
    /// Unsolicited response frame for this command ahead of each reply.
    pub stale_before_reply: Option<u16>,
    /// Send a checksum-corrupted copy ahead of the first reply.
    pub corrupt_first_reply: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            api_version: [0, 1, 40],
            api_reply_v2: false,
            silent: HashSet::new(),
            drop_first: HashMap::new(),
            reject: HashSet::new(),
            canned: HashMap::new(),
            wp_faults: HashMap::new(),
            empty_acks: false,
            info_override: None,
            mission: Vec::new(),
            reply_delay: Duration::ZERO,
            noise_before_reply: Vec::new(),
            stale_before_reply: None,
            corrupt_first_reply: false,
        }
    }
}

impl Behavior {
    pub fn canned(mut self, command: u16, payload: &[u8]) -> Self {
        self.canned.insert(command, payload.to_vec());
        self
    }

    pub fn silent(mut self, command: u16) -> Self {
        self.silent.insert(command);
        self
    }

    pub fn wp_fault(mut self, index: u8, fault: WpFault) -> Self {
        self.wp_faults.insert(index, fault);
        self
    }
}

/// A request as the device saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub command: u16,
    pub version: ProtocolVersion,
    pub payload: Vec<u8>,
    pub at: Instant,
}

enum Outcome {
    Silent,
    Reject,
    Reply(Vec<u8>),
}

struct SimState {
    behavior: Behavior,
    seen: HashMap<u16, usize>,
    log: Vec<Received>,
    saved: bool,
    corrupted_once: bool,
}

impl SimState {
    fn handle(&mut self, frame: &Frame) -> Vec<u8> {
        let command = frame.command();
        self.log.push(Received {
            command,
            version: frame.version(),
            payload: frame.payload().to_vec(),
            at: Instant::now(),
        });
        let seen = {
            let count = self.seen.entry(command).or_insert(0);
            *count += 1;
            *count
        };

        let mut version = frame.version();
        let outcome = if self.behavior.silent.contains(&command)
            || self
                .behavior
                .drop_first
                .get(&command)
                .is_some_and(|&n| seen <= n)
        {
            Outcome::Silent
        } else if self.behavior.reject.contains(&command) {
            Outcome::Reject
        } else {
            match command {
                MSP_API_VERSION => {
                    if self.behavior.api_reply_v2 {
                        version = ProtocolVersion::V2;
                    }
                    Outcome::Reply(self.behavior.api_version.to_vec())
                }
                MSP_SET_WP => self.set_wp(frame.payload()),
                MSP_WP => self.get_wp(frame.payload()),
                MSP_WP_GETINFO => {
                    let mission = &self.behavior.mission;
                    let valid = mission.last().is_some_and(|w| w.flag == FLAG_LAST);
                    Outcome::Reply(
                        self.behavior
                            .info_override
                            .unwrap_or([0, 60, valid as u8, mission.len() as u8])
                            .to_vec(),
                    )
                }
                MSP_WP_MISSION_SAVE => {
                    self.saved = true;
                    Outcome::Reply(Vec::new())
                }
                other => Outcome::Reply(self.behavior.canned.get(&other).cloned().unwrap_or_default()),
            }
        };

        let reply = match outcome {
            Outcome::Silent => return Vec::new(),
            Outcome::Reject => encode(Direction::Error, command, &[], version).unwrap(),
            Outcome::Reply(payload) => {
                encode(Direction::Response, command, &payload, version).unwrap()
            }
        };

        let mut out = self.behavior.noise_before_reply.clone();
        if let Some(stale) = self.behavior.stale_before_reply {
            out.extend(encode(Direction::Response, stale, &[0xEE], version).unwrap());
        }
        if self.behavior.corrupt_first_reply && !self.corrupted_once {
            self.corrupted_once = true;
            let mut bad = reply.clone();
            let last = bad.len() - 1;
            bad[last] ^= 0xFF;
            out.extend(bad);
        }
        out.extend(reply);
        out
    }

    fn set_wp(&mut self, payload: &[u8]) -> Outcome {
        let Some((index, mut waypoint)) = Waypoint::decode(payload) else {
            return Outcome::Reject;
        };
        let echo = match self.behavior.wp_faults.get(&index) {
            Some(WpFault::Silent) => return Outcome::Silent,
            Some(WpFault::Reject) => return Outcome::Reject,
            Some(WpFault::Echo(other)) => *other,
            Some(WpFault::Misstore) => {
                waypoint.lat += 1_000;
                index
            }
            None => index,
        };

        let mission = &mut self.behavior.mission;
        let slot = index as usize;
        while mission.len() <= slot {
            mission.push(Waypoint::new(0, 0, 0, 0));
        }
        mission[slot] = waypoint;
        if waypoint.flag == FLAG_LAST {
            mission.truncate(slot + 1);
        }

        if self.behavior.empty_acks {
            Outcome::Reply(Vec::new())
        } else {
            Outcome::Reply(vec![echo])
        }
    }

    fn get_wp(&mut self, payload: &[u8]) -> Outcome {
        let Some(&index) = payload.first() else {
            return Outcome::Reject;
        };
        let echo = match self.behavior.wp_faults.get(&index) {
            Some(WpFault::Silent) => return Outcome::Silent,
            Some(WpFault::Reject) => return Outcome::Reject,
            Some(WpFault::Echo(other)) => *other,
            Some(WpFault::Misstore) | None => index,
        };
        let waypoint = self
            .behavior
            .mission
            .get(index as usize)
            .copied()
            .unwrap_or(Waypoint::new(0, 0, 0, 0));
        Outcome::Reply(waypoint.encode(echo).to_vec())
    }
}

/// Handle on the simulated device.
pub struct Device {
    state: Arc<Mutex<SimState>>,
    task: JoinHandle<()>,
}

impl Device {
    /// Start a device and return the host-side transport.
    pub fn spawn(behavior: Behavior) -> (StreamTransport<DuplexStream>, Device) {
        let (host, device) = duplex(4096);
        let state = Arc::new(Mutex::new(SimState {
            behavior,
            seen: HashMap::new(),
            log: Vec::new(),
            saved: false,
            corrupted_once: false,
        }));
        let task = tokio::spawn(run(device, state.clone()));
        (StreamTransport::new(host), Device { state, task })
    }

    pub fn log(&self) -> Vec<Received> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn commands(&self) -> Vec<u16> {
        self.log().iter().map(|r| r.command).collect()
    }

    pub fn count(&self, command: u16) -> usize {
        self.log().iter().filter(|r| r.command == command).count()
    }

    pub fn mission(&self) -> Vec<Waypoint> {
        self.state.lock().unwrap().behavior.mission.clone()
    }

    pub fn saved(&self) -> bool {
        self.state.lock().unwrap().saved
    }

    pub fn update(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.state.lock().unwrap().behavior);
    }

    /// Simulate a pulled cable: the host sees EOF.
    pub fn unplug(&self) {
        self.task.abort();
    }
}

async fn run(mut stream: DuplexStream, state: Arc<Mutex<SimState>>) {
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for frame in frames.push(&buf[..n]).into_iter().flatten() {
            if !frame.is_request() {
                continue;
            }
            let (out, delay) = {
                let mut state = state.lock().unwrap();
                (state.handle(&frame), state.behavior.reply_delay)
            };
            if out.is_empty() {
                continue;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if stream.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}

/// Builder with test timeouts and no eager negotiation.
pub fn builder() -> SessionBuilder {
    Session::builder()
        .timeout(TIMEOUT)
        .max_retries(2)
        .negotiate_on_connect(false)
}

/// Session pinned to v1 against a fresh device.
pub async fn v1_session(behavior: Behavior) -> (TestSession, Device) {
    let (transport, device) = Device::spawn(behavior);
    let session = builder()
        .force_version(ProtocolVersion::V1)
        .connect(transport)
        .await
        .unwrap();
    (session, device)
}
