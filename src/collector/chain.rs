//=============================================
// fiberhost/src/collector/chain.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Composable extra-root scanning
// Objective: Chain root contributors without overwriting earlier hooks
//=============================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use super::{RootContributor, RootSink};

/// Ordered chain of root contributors.
///
/// Links run in registration order. A hook that was installed before the
/// chain took over is kept separately and always runs last.
#[derive(Default)]
pub struct RootScanChain {
    links: RwLock<Vec<Arc<dyn RootContributor>>>,
    previous: RwLock<Option<Arc<dyn RootContributor>>>,
    scans: AtomicU64,
}

impl RootScanChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a contributor. Returns `false` when one with the same name is
    /// already linked, in which case the chain is unchanged.
    pub fn register(&self, contributor: Arc<dyn RootContributor>) -> bool {
        let mut links = self.links.write();
        if links.iter().any(|link| link.name() == contributor.name()) {
            debug!(name = contributor.name(), "root contributor already linked");
            return false;
        }
        debug!(name = contributor.name(), "linking root contributor");
        links.push(contributor);
        true
    }

    /// Removes the contributor named `name`. Returns `false` when no such
    /// link exists.
    pub fn unregister(&self, name: &str) -> bool {
        let mut links = self.links.write();
        let before = links.len();
        links.retain(|link| link.name() != name);
        if links.len() == before {
            return false;
        }
        debug!(name, "unlinking root contributor");
        true
    }

    /// Keeps a previously installed hook at the tail of the chain.
    /// Only the first call has an effect.
    pub fn chain_previous(&self, contributor: Arc<dyn RootContributor>) -> bool {
        let mut previous = self.previous.write();
        if previous.is_some() {
            return false;
        }
        debug!(name = contributor.name(), "chaining previous root hook");
        *previous = Some(contributor);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.links.read().iter().any(|link| link.name() == name)
            || self
                .previous
                .read()
                .as_ref()
                .is_some_and(|prev| prev.name() == name)
    }

    pub fn len(&self) -> usize {
        self.links.read().len() + usize::from(self.previous.read().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed root scans.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Runs every link, then the previous hook.
    pub fn push_roots(&self, sink: &mut dyn RootSink) {
        for link in self.links.read().iter() {
            link.push_roots(sink);
        }
        if let Some(previous) = self.previous.read().as_ref() {
            previous.push_roots(sink);
        }
        self.scans.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for RootScanChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links = self.links.read();
        let names: Vec<&str> = links.iter().map(|link| link.name()).collect();
        let previous = self.previous.read();
        f.debug_struct("RootScanChain")
            .field("links", &names)
            .field("previous", &previous.as_ref().map(|prev| prev.name()))
            .field("scans", &self.scans())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::StackBounds;

    struct Fixed(&'static str, StackBounds);

    impl RootContributor for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn push_roots(&self, sink: &mut dyn RootSink) {
            sink.push_range(self.1);
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<StackBounds>);

    impl RootSink for Recorder {
        fn push_range(&mut self, bounds: StackBounds) {
            self.0.push(bounds);
        }
    }

    #[test]
    fn previous_hook_runs_after_links() {
        let chain = RootScanChain::new();
        let old = StackBounds::new(0x10, 0x20);
        let new = StackBounds::new(0x30, 0x40);
        assert!(chain.chain_previous(Arc::new(Fixed("old", old))));
        assert!(chain.register(Arc::new(Fixed("new", new))));

        let mut sink = Recorder::default();
        chain.push_roots(&mut sink);
        assert_eq!(sink.0, vec![new, old]);
        assert_eq!(chain.scans(), 1);
    }

    #[test]
    fn duplicate_names_are_ignored() {
        let chain = RootScanChain::new();
        let range = StackBounds::new(0x10, 0x20);
        assert!(chain.register(Arc::new(Fixed("stack", range))));
        assert!(!chain.register(Arc::new(Fixed("stack", range))));
        assert_eq!(chain.len(), 1);

        let mut sink = Recorder::default();
        chain.push_roots(&mut sink);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn unregister_drops_only_the_named_link() {
        let chain = RootScanChain::new();
        let range = StackBounds::new(0x10, 0x20);
        assert!(chain.register(Arc::new(Fixed("a", range))));
        assert!(chain.register(Arc::new(Fixed("b", range))));
        assert!(chain.unregister("a"));
        assert!(!chain.unregister("a"));
        assert!(!chain.contains("a"));
        assert!(chain.contains("b"));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn previous_hook_is_set_once() {
        let chain = RootScanChain::new();
        let range = StackBounds::new(0x10, 0x20);
        assert!(chain.chain_previous(Arc::new(Fixed("a", range))));
        assert!(!chain.chain_previous(Arc::new(Fixed("b", range))));
        assert!(chain.contains("a"));
        assert!(!chain.contains("b"));
    }
}
