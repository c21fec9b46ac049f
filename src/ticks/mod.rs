//=============================================
// fiberhost/src/ticks/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Drive-tick sources
// Objective: Abstract the host's persistent periodic callback facility
//=============================================

//! Drive ticks.
//!
//! A tick source hands out a persistent subscription: the callback fires
//! repeatedly on the host thread without being re-armed. Every firing is
//! expected to perform exactly one switch into the embedded context.

pub mod interval;
pub mod manual;
pub mod uv;

pub use interval::IntervalTicks;
pub use manual::ManualTicks;
pub use uv::UvIdleTicks;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TickError;

/// Callback run on every tick.
pub type TickFn = Box<dyn FnMut()>;

/// Host facility that fires a callback periodically on the host thread.
pub trait TickSource {
    fn name(&self) -> &'static str;

    /// Registers `tick` for every future firing.
    fn subscribe(&mut self, tick: TickFn) -> Result<TickHandle, TickError>;
}

/// Record of a tick subscription.
///
/// Subscriptions are never cancelled; the handle only identifies one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickHandle {
    source: &'static str,
    id: u64,
}

impl TickHandle {
    pub(crate) fn new(source: &'static str) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            source,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
