#![cfg(feature = "bdwgc")]
#![allow(non_snake_case, non_upper_case_globals)]

mod support;

use std::cell::Cell;
use std::ffi::{c_char, c_void};
use std::ptr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use fiberhost::collector::boehm::BoehmCollector;
use fiberhost::{Collector, ContextId, Scheduler, StackBounds, current_sp};

use support::STACK_SIZE;

type PushOtherRootsProc = unsafe extern "C" fn();

/// What a root scan reported, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Pushed(StackBounds),
    HostHook,
}

static MAIN_BASE: AtomicUsize = AtomicUsize::new(0);
static HOOK: Mutex<Option<PushOtherRootsProc>> = Mutex::new(None);
static HOOK_SETS: AtomicUsize = AtomicUsize::new(0);
static LOCKS: AtomicUsize = AtomicUsize::new(0);
static UNLOCKS: AtomicUsize = AtomicUsize::new(0);
static DEPTH: AtomicUsize = AtomicUsize::new(0);
static NESTED: AtomicUsize = AtomicUsize::new(0);
static EVENTS: Mutex<Vec<Event>> = Mutex::new(Vec::new());

// Stand-ins for the collector symbols a Boehm-enabled host image exports.

#[unsafe(no_mangle)]
pub static mut GC_stackbottom: *mut c_char = ptr::null_mut();

#[unsafe(no_mangle)]
pub extern "C" fn GC_get_main_stack_base() -> *mut c_char {
    MAIN_BASE.load(Ordering::SeqCst) as *mut c_char
}

#[unsafe(no_mangle)]
pub extern "C" fn GC_get_push_other_roots() -> Option<PushOtherRootsProc> {
    expect_unlocked();
    *HOOK.lock().unwrap()
}

#[unsafe(no_mangle)]
pub extern "C" fn GC_set_push_other_roots(proc_: Option<PushOtherRootsProc>) {
    expect_unlocked();
    HOOK_SETS.fetch_add(1, Ordering::SeqCst);
    *HOOK.lock().unwrap() = proc_;
}

#[unsafe(no_mangle)]
pub extern "C" fn GC_push_all_stack_sections(lo: *mut c_char, hi: *mut c_char, _traced: *mut c_void) {
    let bounds = StackBounds::new(lo as usize, hi as usize);
    EVENTS.lock().unwrap().push(Event::Pushed(bounds));
}

#[unsafe(no_mangle)]
pub extern "C" fn GC_alloc_lock() {
    LOCKS.fetch_add(1, Ordering::SeqCst);
    if DEPTH.fetch_add(1, Ordering::SeqCst) != 0 {
        NESTED.fetch_add(1, Ordering::SeqCst);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn GC_alloc_unlock() {
    UNLOCKS.fetch_add(1, Ordering::SeqCst);
    DEPTH.fetch_sub(1, Ordering::SeqCst);
}

/// The real accessors take the allocation lock, which is not recursive.
fn expect_unlocked() {
    if DEPTH.load(Ordering::SeqCst) != 0 {
        NESTED.fetch_add(1, Ordering::SeqCst);
    }
}

unsafe extern "C" fn host_hook() {
    EVENTS.lock().unwrap().push(Event::HostHook);
}

/// Runs the installed extra-roots hook the way a collection would.
fn collect() -> Vec<Event> {
    let hook = HOOK.lock().unwrap().expect("extra-roots hook installed");
    GC_alloc_lock();
    unsafe { hook() };
    GC_alloc_unlock();
    std::mem::take(&mut *EVENTS.lock().unwrap())
}

// Every step shares the process-wide hook state, so this is a single test.
#[test]
fn host_installed_hook_is_chained_after_the_suspended_stack() {
    let base = current_sp();
    MAIN_BASE.store(base, Ordering::SeqCst);
    let host: PushOtherRootsProc = host_hook;
    *HOOK.lock().unwrap() = Some(host);

    let collector = Arc::new(BoehmCollector);
    let seen_bottom = Rc::new(Cell::new(0usize));
    let seen = Rc::clone(&seen_bottom);
    let scheduler = Scheduler::new(collector, STACK_SIZE, move |yielder| {
        seen.set(BoehmCollector.stack_bottom());
        yielder.yield_now();
    })
    .expect("scheduler");
    assert_eq!(BoehmCollector.stack_bottom(), base);

    // Chain updates happen under the allocation lock: one for the host's
    // hook, one for the suspended-stack link.
    let locks = LOCKS.load(Ordering::SeqCst);
    assert!(scheduler.install_root_scan());
    assert_eq!(LOCKS.load(Ordering::SeqCst) - locks, 2);
    assert_eq!(HOOK_SETS.load(Ordering::SeqCst), 1);
    let ours = HOOK.lock().unwrap().expect("hook installed");
    assert_ne!(ours as usize, host as usize);
    assert!(BoehmCollector.root_chain().contains("bdwgc.previous-push-other-roots"));
    assert_eq!(BoehmCollector.root_chain().len(), 2);

    BoehmCollector.hook_root_chain();
    assert!(!scheduler.install_root_scan());
    assert_eq!(HOOK_SETS.load(Ordering::SeqCst), 1);
    assert_eq!(BoehmCollector.root_chain().len(), 2);

    // Not started yet: only the host's own hook has anything to report.
    assert_eq!(collect(), vec![Event::HostHook]);

    scheduler.switch_to(ContextId::Embedded);
    assert_eq!(seen_bottom.get(), scheduler.embedded_stack().high);
    assert_eq!(BoehmCollector.stack_bottom(), base);
    let suspended = scheduler.suspended_bounds();
    assert!(scheduler.embedded_stack().contains(suspended.low));
    assert_eq!(collect(), vec![Event::Pushed(suspended), Event::HostHook]);

    scheduler.switch_to(ContextId::Embedded);
    assert!(scheduler.is_finished());
    assert_eq!(collect(), vec![Event::HostHook]);

    drop(scheduler);
    assert_eq!(BoehmCollector.root_chain().len(), 1);
    assert_eq!(NESTED.load(Ordering::SeqCst), 0);
    assert_eq!(LOCKS.load(Ordering::SeqCst), UNLOCKS.load(Ordering::SeqCst));
    assert_eq!(DEPTH.load(Ordering::SeqCst), 0);
}
