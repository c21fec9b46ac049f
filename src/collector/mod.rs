//=============================================
// fiberhost/src/collector/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Conservative collector integration
// Objective: Describe the collector surface the scheduler depends on
//=============================================

//! Collector integration.
//!
//! The scheduler only needs four things from a conservative collector: its
//! allocation lock, the stack bottom it uses for the running stack, a place
//! to hang extra root scans, and the main thread's stack base. [`Collector`]
//! captures exactly that surface; [`boehm`] binds it to the host image's
//! bdwgc symbols and [`mark_sweep`] provides an in-process heap.

mod augment;
#[cfg(feature = "bdwgc")]
pub mod boehm;
mod chain;
pub mod mark_sweep;

pub use augment::{SuspendedStackRoots, install_suspended_stack_roots};
pub(crate) use augment::uninstall_suspended_stack_roots;
pub use chain::RootScanChain;

use crate::fiber::StackBounds;

/// Receives extra root ranges during a collector's root scan.
pub trait RootSink {
    fn push_range(&mut self, bounds: StackBounds);
}

/// One link of a [`RootScanChain`].
pub trait RootContributor: Send + Sync {
    /// Stable identity used to keep registration idempotent.
    fn name(&self) -> &str;
    fn push_roots(&self, sink: &mut dyn RootSink);
}

/// Conservative collector as seen by the scheduler.
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquires the allocation lock.
    ///
    /// Every allocation takes this lock, so holding it excludes any
    /// allocation-triggered root scan.
    fn lock(&self);

    /// Releases the allocation lock.
    ///
    /// # Safety
    /// The lock must be held. It may be released by a different context on
    /// the same OS thread than the one that acquired it.
    unsafe fn unlock(&self);

    /// Bottom (highest address) of the stack the collector treats as running.
    fn stack_bottom(&self) -> usize;

    /// # Safety
    /// The caller must hold the allocation lock and `bottom` must be the
    /// bottom of the stack that is about to run.
    unsafe fn set_stack_bottom(&self, bottom: usize);

    /// Bottom of the OS thread's original stack.
    fn main_stack_base(&self) -> usize;

    /// Chain consulted every time the collector scans extra roots.
    fn root_chain(&self) -> &RootScanChain;

    /// Routes the collector's extra-roots hook through [`Self::root_chain`].
    /// Calling it more than once has no further effect.
    fn hook_root_chain(&self) {}
}
