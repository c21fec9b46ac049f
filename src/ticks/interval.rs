//=============================================
// fiberhost/src/ticks/interval.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Fixed-rate tick loop
// Objective: Drive ticks from a standalone host without an event loop
//=============================================

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{TickFn, TickHandle, TickSource};
use crate::error::TickError;

/// Tick source that owns the host loop and fires at a fixed rate.
pub struct IntervalTicks {
    period: Duration,
    subscribers: Vec<TickFn>,
    fired: u64,
}

impl IntervalTicks {
    pub const DEFAULT_FPS: u32 = 60;

    /// Fires `fps` times per second. Zero means as fast as possible.
    pub fn with_fps(fps: u32) -> Self {
        let period = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        Self {
            period,
            subscribers: Vec::new(),
            fired: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Fires every subscriber once.
    pub fn fire(&mut self) {
        for tick in self.subscribers.iter_mut() {
            tick();
        }
        self.fired += 1;
    }

    /// Runs the loop until `done` reports true after a firing. Returns the
    /// number of firings.
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool) -> u64 {
        let started = self.fired;
        debug!(period = ?self.period, "interval tick loop started");
        loop {
            let deadline = Instant::now() + self.period;
            self.fire();
            if done() {
                break;
            }
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                trace!(overrun = ?(now - deadline), "tick overran its period");
            }
        }
        let count = self.fired - started;
        debug!(count, "interval tick loop stopped");
        count
    }
}

impl Default for IntervalTicks {
    fn default() -> Self {
        Self::with_fps(Self::DEFAULT_FPS)
    }
}

impl TickSource for IntervalTicks {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn subscribe(&mut self, tick: TickFn) -> Result<TickHandle, TickError> {
        self.subscribers.push(tick);
        Ok(TickHandle::new(self.name()))
    }
}

impl std::fmt::Debug for IntervalTicks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalTicks")
            .field("period", &self.period)
            .field("subscribers", &self.subscribers.len())
            .field("fired", &self.fired)
            .finish()
    }
}
