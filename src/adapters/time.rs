//! Monotonic clock adapter.
//!
//! Milliseconds since construction, from `std::time::Instant`. The poll loop
//! feeds this into `NobleBridge::service` for connect backoff deadlines.

use std::time::Instant;

use crate::app::ports::TimePort;

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since start.
    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePort for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
