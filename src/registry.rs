//=============================================
// fiberhost/src/registry.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Stack bounds registry
// Objective: Track the suspended context's stack region across switches
//=============================================

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::collector::Collector;
use crate::fiber::StackBounds;

/// Address range of whichever context is currently suspended.
///
/// Written only by the switching thread while it holds the collector's
/// allocation lock; read by root scans, which take the same lock. The fields
/// are atomics because a stop-the-world collector may run its root scan from
/// a different OS thread than the one that switches.
#[derive(Debug)]
pub struct BoundsRegistry {
    low: AtomicUsize,
    high: AtomicUsize,
    exchanges: AtomicU64,
}

impl BoundsRegistry {
    /// Creates a registry describing a not-yet-started context.
    ///
    /// `stack_top` is the highest address of that context's stack; it is
    /// handed to the collector as the stack bottom on the first switch.
    pub fn new(stack_top: usize) -> Self {
        Self {
            low: AtomicUsize::new(stack_top),
            high: AtomicUsize::new(stack_top),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Region of the suspended context.
    pub fn suspended(&self) -> StackBounds {
        let low = self.low.load(Ordering::Acquire);
        let high = self.high.load(Ordering::Acquire);
        StackBounds { low, high }
    }

    /// Number of completed exchanges.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Makes the suspended context the running one in the collector's view.
    ///
    /// The running context's region `[sp, collector stack bottom)` becomes
    /// the suspended record, and the previously suspended context's bottom
    /// becomes the collector's stack bottom. Returns the new record.
    ///
    /// # Safety
    /// The caller must hold the collector's allocation lock and must transfer
    /// control to the previously suspended context before releasing it.
    pub unsafe fn exchange(&self, collector: &dyn Collector, sp: usize) -> StackBounds {
        let running_bottom = collector.stack_bottom();
        let target_bottom = self.high.load(Ordering::Acquire);
        unsafe { collector.set_stack_bottom(target_bottom) };
        self.low.store(sp, Ordering::Release);
        self.high.store(running_bottom, Ordering::Release);
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        StackBounds::new(sp, running_bottom)
    }

    /// Clears the record once the suspended context can never run again.
    ///
    /// # Safety
    /// The caller must hold the collector's allocation lock.
    pub unsafe fn retire(&self) {
        let high = self.high.load(Ordering::Acquire);
        self.low.store(high, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mark_sweep::MarkSweepHeap;

    #[test]
    fn exchange_swaps_running_and_suspended_bottoms() {
        let heap = MarkSweepHeap::new(0x9000);
        unsafe { heap.set_stack_bottom(0x9000) };
        let registry = BoundsRegistry::new(0x5000);
        assert!(registry.suspended().is_empty());

        unsafe {
            heap.lock();
            let record = registry.exchange(&heap, 0x8800);
            heap.unlock();
            assert_eq!(record, StackBounds::new(0x8800, 0x9000));
        }
        assert_eq!(heap.stack_bottom(), 0x5000);
        assert_eq!(registry.suspended(), StackBounds::new(0x8800, 0x9000));

        unsafe {
            heap.lock();
            registry.exchange(&heap, 0x4c00);
            heap.unlock();
        }
        assert_eq!(heap.stack_bottom(), 0x9000);
        assert_eq!(registry.suspended(), StackBounds::new(0x4c00, 0x5000));
        assert_eq!(registry.exchanges(), 2);
    }

    #[test]
    fn retire_leaves_nothing_to_scan() {
        let heap = MarkSweepHeap::new(0x9000);
        let registry = BoundsRegistry::new(0x5000);
        unsafe {
            heap.lock();
            registry.exchange(&heap, 0x8800);
            registry.retire();
            heap.unlock();
        }
        assert!(registry.suspended().is_empty());
    }
}
