mod support;

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fiberhost::collector::mark_sweep::{MarkSweepHeap, clear_dead_stack};
use fiberhost::{Collector, ContextId, RootContributor, RootSink, Scheduler, StackBounds};

use support::{MASK, STACK_SIZE, heap};

/// What the embedded side found after the host's allocation burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Alive,
    Reclaimed,
}

/// Embedded body that holds one object in a local across a single yield
/// and reports whether it is still allocated afterwards. The host only
/// ever sees the masked address.
fn hold_across_yield(
    heap: &Arc<MarkSweepHeap>,
    verdict: &Rc<Cell<Verdict>>,
    masked: &Rc<Cell<usize>>,
) -> Scheduler {
    let body_heap = Arc::clone(heap);
    let verdict = Rc::clone(verdict);
    let masked = Rc::clone(masked);
    Scheduler::new(heap.clone(), STACK_SIZE, move |yielder| {
        let object = body_heap.alloc(8);
        unsafe { object.as_ptr().write(0xfeed_f00d) };
        masked.set(object.as_ptr() as usize ^ MASK);
        black_box(&object);
        yielder.yield_now();
        black_box(&object);
        let alive = body_heap.contains(object.as_ptr() as usize)
            && unsafe { object.as_ptr().read() } == 0xfeed_f00d;
        verdict.set(if alive { Verdict::Alive } else { Verdict::Reclaimed });
    })
    .expect("scheduler")
}

#[test]
fn suspended_locals_survive_host_allocation_pressure() {
    let heap = heap(1024);
    let verdict = Rc::new(Cell::new(Verdict::Pending));
    let masked = Rc::new(Cell::new(0));
    let scheduler = hold_across_yield(&heap, &verdict, &masked);
    assert!(scheduler.install_root_scan());

    scheduler.switch_to(ContextId::Embedded);
    for _ in 0..120_000 {
        heap.alloc(2);
    }
    clear_dead_stack();
    heap.collect();
    assert!(heap.collections() > 100);
    assert!(heap.contains(masked.get() ^ MASK));

    scheduler.switch_to(ContextId::Embedded);
    assert!(scheduler.is_finished());
    assert_eq!(verdict.get(), Verdict::Alive);
}

#[test]
fn without_the_augmentation_suspended_locals_are_lost() {
    let heap = heap(0);
    let verdict = Rc::new(Cell::new(Verdict::Pending));
    let masked = Rc::new(Cell::new(0));
    let scheduler = hold_across_yield(&heap, &verdict, &masked);

    scheduler.switch_to(ContextId::Embedded);
    clear_dead_stack();
    let stats = heap.collect();
    assert_eq!(stats.extra_ranges, 0);
    assert!(stats.freed >= 1);

    scheduler.switch_to(ContextId::Embedded);
    assert_eq!(verdict.get(), Verdict::Reclaimed);
}

#[test]
fn augmentation_installs_once() {
    let heap = heap(0);
    let verdict = Rc::new(Cell::new(Verdict::Pending));
    let masked = Rc::new(Cell::new(0));
    let scheduler = hold_across_yield(&heap, &verdict, &masked);
    assert!(scheduler.install_root_scan());
    assert!(!scheduler.install_root_scan());
    assert_eq!(heap.root_chain().len(), 1);

    scheduler.switch_to(ContextId::Embedded);
    let stats = heap.collect();
    assert_eq!(stats.extra_ranges, 1);
    assert_eq!(heap.root_chain().scans(), 1);

    scheduler.switch_to(ContextId::Embedded);
    assert_eq!(verdict.get(), Verdict::Alive);
    // Nothing is suspended once the embedded context has finished.
    assert_eq!(heap.collect().extra_ranges, 0);
}

struct Foreign {
    bounds: StackBounds,
    calls: AtomicU64,
}

impl RootContributor for Foreign {
    fn name(&self) -> &str {
        "foreign"
    }

    fn push_roots(&self, sink: &mut dyn RootSink) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        sink.push_range(self.bounds);
    }
}

#[test]
fn earlier_hook_keeps_running_after_install() {
    let heap = heap(0);
    let kept = heap.alloc(4).as_ptr() as usize;
    let mut pinned = Box::new([0usize; 2]);
    pinned[0] = kept;
    let low = pinned.as_ptr() as usize;
    let foreign = Arc::new(Foreign {
        bounds: StackBounds::new(low, low + std::mem::size_of_val(&*pinned)),
        calls: AtomicU64::new(0),
    });
    assert!(heap.root_chain().chain_previous(foreign.clone()));

    let verdict = Rc::new(Cell::new(Verdict::Pending));
    let masked = Rc::new(Cell::new(0));
    let scheduler = hold_across_yield(&heap, &verdict, &masked);
    assert!(scheduler.install_root_scan());
    assert!(heap.root_chain().contains("foreign"));

    scheduler.switch_to(ContextId::Embedded);
    clear_dead_stack();
    let stats = heap.collect();
    assert_eq!(stats.extra_ranges, 2);
    assert_eq!(foreign.calls.load(Ordering::Relaxed), 1);
    assert!(heap.contains(kept));

    scheduler.switch_to(ContextId::Embedded);
    assert_eq!(verdict.get(), Verdict::Alive);
}

#[test]
fn dropped_suspended_scheduler_leaves_nothing_to_scan() {
    let heap = heap(0);
    let verdict = Rc::new(Cell::new(Verdict::Pending));
    let masked = Rc::new(Cell::new(0));
    let scheduler = hold_across_yield(&heap, &verdict, &masked);
    assert!(scheduler.install_root_scan());
    scheduler.switch_to(ContextId::Embedded);
    let registry = Arc::clone(scheduler.registry());
    assert!(!registry.suspended().is_empty());

    drop(scheduler);
    clear_dead_stack();
    let stats = heap.collect();
    assert_eq!(stats.extra_ranges, 0);
    assert!(registry.suspended().is_empty());
    assert!(heap.root_chain().is_empty());
    assert_eq!(verdict.get(), Verdict::Pending);
}
