//=============================================
// fiberhost/src/collector/boehm.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: bdwgc binding
// Objective: Drive the host image's Boehm collector through the Collector trait
//=============================================

//! Binding to the Boehm-Demers-Weiser collector already linked into the
//! host process. Symbols are resolved when the module is loaded, so this
//! backend is only usable inside a process that exports them.

use std::ffi::{c_char, c_void};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use tracing::info;

use super::{Collector, RootContributor, RootScanChain, RootSink};
use crate::fiber::StackBounds;

type PushOtherRootsProc = unsafe extern "C" fn();

unsafe extern "C" {
    static mut GC_stackbottom: *mut c_char;
    fn GC_get_main_stack_base() -> *mut c_char;
    fn GC_get_push_other_roots() -> Option<PushOtherRootsProc>;
    fn GC_set_push_other_roots(proc_: Option<PushOtherRootsProc>);
    fn GC_push_all_stack_sections(lo: *mut c_char, hi: *mut c_char, traced: *mut c_void);
    fn GC_alloc_lock();
    fn GC_alloc_unlock();
}

static CHAIN: Lazy<RootScanChain> = Lazy::new(RootScanChain::new);
static HOOKED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn push_other_roots() {
    CHAIN.push_roots(&mut BoehmSink);
}

struct BoehmSink;

impl RootSink for BoehmSink {
    fn push_range(&mut self, bounds: StackBounds) {
        unsafe {
            GC_push_all_stack_sections(
                bounds.low as *mut c_char,
                bounds.high as *mut c_char,
                ptr::null_mut(),
            );
        }
    }
}

/// Extra-roots hook that was installed before ours.
struct ForeignRoots(PushOtherRootsProc);

impl RootContributor for ForeignRoots {
    fn name(&self) -> &str {
        "bdwgc.previous-push-other-roots"
    }

    fn push_roots(&self, _sink: &mut dyn RootSink) {
        unsafe { (self.0)() };
    }
}

/// The process-wide Boehm collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoehmCollector;

impl Collector for BoehmCollector {
    fn name(&self) -> &'static str {
        "bdwgc"
    }

    fn lock(&self) {
        unsafe { GC_alloc_lock() };
    }

    unsafe fn unlock(&self) {
        unsafe { GC_alloc_unlock() };
    }

    fn stack_bottom(&self) -> usize {
        unsafe { ptr::addr_of!(GC_stackbottom).read() as usize }
    }

    unsafe fn set_stack_bottom(&self, bottom: usize) {
        unsafe { ptr::addr_of_mut!(GC_stackbottom).write(bottom as *mut c_char) };
    }

    fn main_stack_base(&self) -> usize {
        unsafe { GC_get_main_stack_base() as usize }
    }

    fn root_chain(&self) -> &RootScanChain {
        &CHAIN
    }

    fn hook_root_chain(&self) {
        if HOOKED.swap(true, Ordering::AcqRel) {
            return;
        }
        let ours: PushOtherRootsProc = push_other_roots;
        // Both accessors take the allocation lock themselves.
        let previous = unsafe { GC_get_push_other_roots() };
        if let Some(previous) = previous.filter(|previous| *previous as usize != ours as usize) {
            self.lock();
            CHAIN.chain_previous(Arc::new(ForeignRoots(previous)));
            unsafe { self.unlock() };
        }
        unsafe { GC_set_push_other_roots(Some(ours)) };
        info!("bdwgc extra-roots hook routed through fiberhost chain");
    }
}
