//! Session statistics.
//!
//! Counters are lock-free atomics so `Session::stats()` can be read while a
//! request holds the transport. They only ever grow for the life of the
//! session. Round-trip times are kept per command behind a short-lived lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Round trips kept per command for the recent average.
pub(crate) const RECENT_WINDOW: usize = 100;

/// Round-trip timing for one command.
#[derive(Debug, Default)]
struct Timing {
    calls: u64,
    errors: u64,
    total: Duration,
    recent: VecDeque<Duration>,
}

impl Timing {
    fn record(&mut self, elapsed: Duration, ok: bool) {
        self.calls += 1;
        if !ok {
            self.errors += 1;
        }
        self.total += elapsed;
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(elapsed);
    }

    fn stats(&self) -> CommandStats {
        let avg_ms = |total: Duration, n: usize| {
            if n == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1000.0 / n as f64
            }
        };
        CommandStats {
            calls: self.calls,
            errors: self.errors,
            avg_time_ms: avg_ms(self.total, self.calls as usize),
            recent_avg_ms: avg_ms(self.recent.iter().sum(), self.recent.len()),
        }
    }
}

/// Live counters shared between a session and its handles.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    requests: AtomicU64,
    responses: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    checksum_failures: AtomicU64,
    stale_frames: AtomicU64,
    device_rejections: AtomicU64,
    abandoned_requests: AtomicU64,
    negotiations: AtomicU64,
    timings: Mutex<HashMap<u16, Timing>>,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    counter! {
        record_request => requests,
        record_response => responses,
        record_retry => retries,
        record_timeout => timeouts,
        record_checksum_failure => checksum_failures,
        record_stale_frame => stale_frames,
        record_rejection => device_rejections,
        record_abandoned => abandoned_requests,
        record_negotiation => negotiations,
    }

    /// Record one finished exchange, successful or not.
    pub(crate) fn record_exchange(&self, command: u16, elapsed: Duration, ok: bool) {
        let mut timings = self.timings.lock().unwrap_or_else(|e| e.into_inner());
        timings.entry(command).or_default().record(elapsed, ok);
    }

    /// Take a consistent-enough copy of every counter.
    pub(crate) fn snapshot(&self, discarded_bytes: u64) -> SessionStats {
        let commands = self
            .timings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(&command, timing)| (command, timing.stats()))
            .collect();
        SessionStats {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            stale_frames: self.stale_frames.load(Ordering::Relaxed),
            device_rejections: self.device_rejections.load(Ordering::Relaxed),
            abandoned_requests: self.abandoned_requests.load(Ordering::Relaxed),
            negotiations: self.negotiations.load(Ordering::Relaxed),
            discarded_bytes,
            commands,
        }
    }
}

/// Round-trip statistics for one command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
    /// Finished exchanges, including failed ones.
    pub calls: u64,
    /// Exchanges that ended in an error (timeout, rejection, I/O).
    pub errors: u64,
    /// Mean time from first write to completion.
    pub avg_time_ms: f64,
    /// Mean over the most recent exchanges.
    pub recent_avg_ms: f64,
}

impl CommandStats {
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}

/// Snapshot of a session's cumulative statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Requests issued by callers (including negotiation probes).
    pub requests: u64,
    /// Requests answered with a matching response frame.
    pub responses: u64,
    /// Re-sends after a deadline passed.
    pub retries: u64,
    /// Requests that failed after exhausting retries.
    pub timeouts: u64,
    /// Frame candidates rejected by the reassembler.
    pub checksum_failures: u64,
    /// Valid frames that matched no pending request.
    pub stale_frames: u64,
    /// Requests answered with an error frame.
    pub device_rejections: u64,
    /// Requests whose caller went away before completion.
    pub abandoned_requests: u64,
    /// Version negotiations attempted.
    pub negotiations: u64,
    /// Noise bytes dropped by the reassembler.
    pub discarded_bytes: u64,
    /// Round-trip timing keyed by command code.
    #[serde(default)]
    pub commands: BTreeMap<u16, CommandStats>,
}

impl SessionStats {
    /// Fraction of requests that timed out, 0.0 with no requests.
    pub fn timeout_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.timeouts as f64 / self.requests as f64
        }
    }

    /// Serialize as pretty JSON, e.g. for a diagnostics dump.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
