//! Countdown reconciliation between the local timer and the server clock.
//!
//! The local value decrements once per second while the attempt is in
//! progress. The server remains authoritative: each `time_sync` message may
//! snap the local value, but only when the drift exceeds a small tolerance,
//! so tab throttling and suspend/resume are bounded without visible jitter
//! on every tick.

/// The attempt countdown, in whole seconds.
#[derive(Debug, Clone)]
pub struct ExamClock {
    remaining: u64,
    drift_tolerance: u64,
}

impl ExamClock {
    pub fn new(remaining_secs: u64, drift_tolerance_secs: u64) -> Self {
        Self {
            remaining: remaining_secs,
            drift_tolerance: drift_tolerance_secs,
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Advance the local countdown by one second. Saturates at zero and
    /// returns the new remaining value.
    pub fn tick(&mut self) -> u64 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Apply an authoritative server value. Snaps only when the drift
    /// exceeds the tolerance; returns `true` when a correction was applied.
    pub fn sync(&mut self, server_secs: u64) -> bool {
        if self.remaining.abs_diff(server_secs) > self.drift_tolerance {
            self.remaining = server_secs;
            true
        } else {
            false
        }
    }
}
