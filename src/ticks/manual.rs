//=============================================
// fiberhost/src/ticks/manual.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Caller-driven tick source
// Objective: Fire ticks explicitly from an embedder's own loop
//=============================================

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use super::{TickFn, TickHandle, TickSource};
use crate::error::TickError;

/// Tick source fired by calling [`ManualTicks::fire`].
///
/// Clones share the same subscriber list, so one clone can be handed to a
/// bootstrap while another keeps firing.
#[derive(Clone, Default)]
pub struct ManualTicks {
    subscribers: Rc<RefCell<Vec<TickFn>>>,
    fired: Rc<Cell<u64>>,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every subscriber once. Returns how many ran.
    pub fn fire(&self) -> usize {
        // Subscribers may switch stacks, so no borrow is held while they run.
        let mut running = mem::take(&mut *self.subscribers.borrow_mut());
        for tick in running.iter_mut() {
            tick();
        }
        let count = running.len();
        let mut subscribers = self.subscribers.borrow_mut();
        running.append(&mut subscribers);
        *subscribers = running;
        self.fired.set(self.fired.get() + 1);
        count
    }

    /// Number of `fire` calls so far.
    pub fn fired(&self) -> u64 {
        self.fired.get()
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl TickSource for ManualTicks {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn subscribe(&mut self, tick: TickFn) -> Result<TickHandle, TickError> {
        self.subscribers.borrow_mut().push(tick);
        Ok(TickHandle::new(self.name()))
    }
}

impl std::fmt::Debug for ManualTicks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTicks")
            .field("subscribers", &self.subscribers())
            .field("fired", &self.fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_persists_across_fires() {
        let mut ticks = ManualTicks::new();
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let handle = ticks
            .subscribe(Box::new(move || seen.set(seen.get() + 1)))
            .expect("subscribe");
        assert_eq!(handle.source(), "manual");

        for _ in 0..5 {
            assert_eq!(ticks.fire(), 1);
        }
        assert_eq!(count.get(), 5);
        assert_eq!(ticks.fired(), 5);
    }

    #[test]
    fn subscribing_from_a_tick_takes_effect_next_fire() {
        let ticks = ManualTicks::new();
        let mut inner = ticks.clone();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let mut outer = ticks.clone();
        outer
            .subscribe(Box::new(move || {
                let counter = counter.clone();
                inner
                    .subscribe(Box::new(move || counter.set(counter.get() + 1)))
                    .expect("nested subscribe");
            }))
            .expect("subscribe");

        assert_eq!(ticks.fire(), 1);
        assert_eq!(hits.get(), 0);
        assert_eq!(ticks.fire(), 2);
        assert_eq!(hits.get(), 1);
    }
}
