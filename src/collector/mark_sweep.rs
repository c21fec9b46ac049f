//=============================================
// fiberhost/src/collector/mark_sweep.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: In-process conservative mark-and-sweep heap
// Objective: Give the scheduler a collector with the same stack model as bdwgc
//=============================================

//! A small conservative collector.
//!
//! Roots are the running stack, from the caller's stack pointer up to the
//! current stack bottom, plus whatever the [`RootScanChain`] pushes. Any
//! word that points into a block keeps that block alive, and live blocks
//! are scanned the same way. Collections run automatically every
//! `threshold` allocations.

use std::cell::UnsafeCell;
use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RawMutex;
use parking_lot::lock_api::RawMutex as _;
use serde::Serialize;
use tracing::{debug, warn};

use super::{Collector, RootScanChain, RootSink};
use crate::fiber::{StackBounds, current_sp};

const WORD: usize = mem::size_of::<usize>();

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    /// Blocks that survived.
    pub live: usize,
    /// Blocks released.
    pub freed: usize,
    /// Extra ranges pushed by the root chain.
    pub extra_ranges: usize,
    /// Stack and block words examined.
    pub scanned_words: usize,
}

/// Lifetime counters of a heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub allocated: u64,
    pub freed: u64,
    pub live: usize,
    pub collections: u64,
}

#[derive(Default)]
struct HeapState {
    blocks: BTreeMap<usize, Box<[usize]>>,
    since_collect: usize,
    allocated: u64,
    freed: u64,
}

impl HeapState {
    fn block_containing(&self, word: usize) -> Option<usize> {
        let (&base, block) = self.blocks.range(..=word).next_back()?;
        (word < base + block.len() * WORD).then_some(base)
    }
}

/// Conservative mark-and-sweep heap guarded by an allocation lock.
pub struct MarkSweepHeap {
    lock: RawMutex,
    state: UnsafeCell<HeapState>,
    stack_bottom: AtomicUsize,
    main_stack_base: usize,
    threshold: usize,
    collections: AtomicU64,
    chain: RootScanChain,
}

// `state` is only touched while `lock` is held.
unsafe impl Sync for MarkSweepHeap {}

impl MarkSweepHeap {
    pub const DEFAULT_THRESHOLD: usize = 4096;

    /// Creates a heap whose running stack initially ends at
    /// `main_stack_base`.
    pub fn new(main_stack_base: usize) -> Self {
        Self {
            lock: RawMutex::INIT,
            state: UnsafeCell::new(HeapState::default()),
            stack_bottom: AtomicUsize::new(main_stack_base),
            main_stack_base,
            threshold: Self::DEFAULT_THRESHOLD,
            collections: AtomicU64::new(0),
            chain: RootScanChain::new(),
        }
    }

    /// Sets how many allocations trigger a collection. Zero disables
    /// automatic collection.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Allocates a zeroed block of `words` machine words.
    pub fn alloc(&self, words: usize) -> NonNull<usize> {
        let mut guard = HeapGuard::acquire(self);
        let state = guard.state();
        if self.threshold > 0 && state.since_collect >= self.threshold {
            self.collect_locked(state);
        }
        let mut block = vec![0usize; words.max(1)].into_boxed_slice();
        let base = block.as_mut_ptr();
        state.blocks.insert(base as usize, block);
        state.since_collect += 1;
        state.allocated += 1;
        // Boxed slices of at least one element are never null.
        NonNull::new(base).unwrap_or(NonNull::dangling())
    }

    /// Runs a full collection now.
    pub fn collect(&self) -> CollectStats {
        let mut guard = HeapGuard::acquire(self);
        self.collect_locked(guard.state())
    }

    /// Whether `addr` points into a block that is still allocated.
    pub fn contains(&self, addr: usize) -> bool {
        let mut guard = HeapGuard::acquire(self);
        guard.state().block_containing(addr).is_some()
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HeapStats {
        let mut guard = HeapGuard::acquire(self);
        let state = guard.state();
        HeapStats {
            allocated: state.allocated,
            freed: state.freed,
            live: state.blocks.len(),
            collections: self.collections(),
        }
    }

    fn collect_locked(&self, state: &mut HeapState) -> CollectStats {
        let mut stats = CollectStats::default();
        let mut marked = HashSet::new();
        let mut pending = Vec::new();

        let sp = current_sp();
        let bottom = self.stack_bottom.load(Ordering::Acquire);
        if sp < bottom {
            let running = StackBounds::new(sp, bottom);
            stats.scanned_words += scan(state, running, &mut marked, &mut pending);
        } else {
            warn!(sp, bottom, "stack pointer above stack bottom; skipping running stack");
        }

        let mut extra = RangeSink::default();
        self.chain.push_roots(&mut extra);
        stats.extra_ranges = extra.0.len();
        for range in extra.0 {
            stats.scanned_words += scan(state, range, &mut marked, &mut pending);
        }

        while let Some(base) = pending.pop() {
            let Some(block) = state.blocks.get(&base) else {
                continue;
            };
            stats.scanned_words += block.len();
            for &word in block.iter() {
                if let Some(target) = state.block_containing(word) {
                    if marked.insert(target) {
                        pending.push(target);
                    }
                }
            }
        }

        let before = state.blocks.len();
        state.blocks.retain(|base, _| marked.contains(base));
        stats.live = state.blocks.len();
        stats.freed = before - stats.live;
        state.freed += stats.freed as u64;
        state.since_collect = 0;
        self.collections.fetch_add(1, Ordering::Relaxed);
        debug!(?stats, "collection finished");
        stats
    }
}

impl Collector for MarkSweepHeap {
    fn name(&self) -> &'static str {
        "mark-sweep"
    }

    fn lock(&self) {
        self.lock.lock();
    }

    unsafe fn unlock(&self) {
        unsafe { self.lock.unlock() };
    }

    fn stack_bottom(&self) -> usize {
        self.stack_bottom.load(Ordering::Acquire)
    }

    unsafe fn set_stack_bottom(&self, bottom: usize) {
        self.stack_bottom.store(bottom, Ordering::Release);
    }

    fn main_stack_base(&self) -> usize {
        self.main_stack_base
    }

    fn root_chain(&self) -> &RootScanChain {
        &self.chain
    }
}

impl std::fmt::Debug for MarkSweepHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkSweepHeap")
            .field("stack_bottom", &self.stack_bottom())
            .field("threshold", &self.threshold)
            .field("collections", &self.collections())
            .field("chain", &self.chain)
            .finish()
    }
}

struct HeapGuard<'a> {
    heap: &'a MarkSweepHeap,
}

impl<'a> HeapGuard<'a> {
    fn acquire(heap: &'a MarkSweepHeap) -> Self {
        heap.lock.lock();
        Self { heap }
    }

    fn state(&mut self) -> &mut HeapState {
        unsafe { &mut *self.heap.state.get() }
    }
}

impl Drop for HeapGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.heap.lock.unlock() };
    }
}

#[derive(Default)]
struct RangeSink(Vec<StackBounds>);

impl RootSink for RangeSink {
    fn push_range(&mut self, bounds: StackBounds) {
        self.0.push(bounds);
    }
}

fn scan(
    state: &HeapState,
    range: StackBounds,
    marked: &mut HashSet<usize>,
    pending: &mut Vec<usize>,
) -> usize {
    let mut addr = range.low.next_multiple_of(WORD);
    let mut words = 0;
    while addr + WORD <= range.high {
        let word = unsafe { ptr::read_volatile(addr as *const usize) };
        if let Some(base) = state.block_containing(word) {
            if marked.insert(base) {
                pending.push(base);
            }
        }
        addr += WORD;
        words += 1;
    }
    words
}

/// Overwrites dead stack below the caller with zeros, so stale pointers
/// left by returned frames are not mistaken for roots.
#[inline(never)]
pub fn clear_dead_stack() {
    let mut scratch = [0usize; 2048];
    std::hint::black_box(&mut scratch);
}
