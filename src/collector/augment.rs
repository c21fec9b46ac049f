//=============================================
// fiberhost/src/collector/augment.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Suspended-stack root scanning
// Objective: Report the inactive context's stack to the collector
//=============================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use super::{Collector, RootContributor, RootSink};
use crate::registry::BoundsRegistry;

/// Root contributor that pushes the suspended context's stack region.
#[derive(Debug)]
pub struct SuspendedStackRoots {
    name: String,
    registry: Arc<BoundsRegistry>,
    pushes: AtomicU64,
}

impl SuspendedStackRoots {
    pub fn new(registry: Arc<BoundsRegistry>) -> Self {
        Self {
            name: link_name(&registry),
            registry,
            pushes: AtomicU64::new(0),
        }
    }

    /// Number of non-empty regions pushed so far.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }
}

fn link_name(registry: &Arc<BoundsRegistry>) -> String {
    format!("suspended-stack@{:p}", Arc::as_ptr(registry))
}

impl RootContributor for SuspendedStackRoots {
    fn name(&self) -> &str {
        &self.name
    }

    fn push_roots(&self, sink: &mut dyn RootSink) {
        let bounds = self.registry.suspended();
        if bounds.is_empty() {
            return;
        }
        trace!(?bounds, "scanning suspended stack");
        sink.push_range(bounds);
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hooks `collector` so every root scan also covers `registry`'s suspended
/// region. Returns `false` when that registry was already linked.
///
/// The link is added under the allocation lock so no root scan can observe
/// the chain mid-update.
pub fn install_suspended_stack_roots(
    collector: &dyn Collector,
    registry: &Arc<BoundsRegistry>,
) -> bool {
    collector.hook_root_chain();
    let link = Arc::new(SuspendedStackRoots::new(registry.clone()));
    collector.lock();
    let linked = collector.root_chain().register(link);
    unsafe { collector.unlock() };
    linked
}

/// Retires `registry`'s record and unlinks it from `collector`'s root scan.
/// Returns `false` when it was not linked.
///
/// # Safety
/// The caller must hold the allocation lock, and the context the record
/// describes must never run again.
pub(crate) unsafe fn uninstall_suspended_stack_roots(
    collector: &dyn Collector,
    registry: &Arc<BoundsRegistry>,
) -> bool {
    unsafe { registry.retire() };
    collector.root_chain().unregister(&link_name(registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mark_sweep::MarkSweepHeap;

    #[test]
    fn second_install_is_a_no_op() {
        let heap = MarkSweepHeap::new(0x9000);
        let registry = Arc::new(BoundsRegistry::new(0x5000));
        assert!(install_suspended_stack_roots(&heap, &registry));
        assert!(!install_suspended_stack_roots(&heap, &registry));
        assert_eq!(heap.root_chain().len(), 1);
    }

    #[test]
    fn uninstall_clears_the_record_and_the_link() {
        let heap = MarkSweepHeap::new(0x9000);
        let registry = Arc::new(BoundsRegistry::new(0x5000));
        assert!(install_suspended_stack_roots(&heap, &registry));
        unsafe {
            heap.lock();
            registry.exchange(&heap, 0x8800);
            assert!(uninstall_suspended_stack_roots(&heap, &registry));
            assert!(!uninstall_suspended_stack_roots(&heap, &registry));
            heap.unlock();
        }
        assert!(registry.suspended().is_empty());
        assert!(heap.root_chain().is_empty());
    }

    #[test]
    fn distinct_registries_get_distinct_links() {
        let heap = MarkSweepHeap::new(0x9000);
        let first = Arc::new(BoundsRegistry::new(0x5000));
        let second = Arc::new(BoundsRegistry::new(0x7000));
        assert!(install_suspended_stack_roots(&heap, &first));
        assert!(install_suspended_stack_roots(&heap, &second));
        assert_eq!(heap.root_chain().len(), 2);
    }
}
