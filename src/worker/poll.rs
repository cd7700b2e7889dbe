//! Tick scheduling for stream pollers.
//!
//! Each poller owns an independent interval timer. The first tick fires one
//! full interval after the poller starts, matching a plain ticker: a restarted
//! agent waits `sample_frequency` before its first fetch.
//!
//! A drain that runs longer than the interval does not cause a burst of
//! catch-up ticks. The next tick is scheduled one interval after the late one
//! was observed.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Polling schedule for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Interval between ticks.
    pub interval: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        PollSchedule { interval }
    }

    /// Creates the ticker a poller waits on.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}
