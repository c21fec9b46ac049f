//=============================================
// fiberhost/src/scheduler.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Symmetric two-context scheduler
// Objective: Switch between host and embedded stacks with collector handoff
//=============================================

//! The two-context scheduler.
//!
//! A [`Scheduler`] owns the embedded context's stack and the handle of
//! whichever context is suspended. Every switch takes the collector's
//! allocation lock, exchanges the stack bookkeeping in the
//! [`BoundsRegistry`], and jumps while still holding the lock; the context
//! that resumes releases it. A freshly started embedded context releases it
//! as its first action.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::collector::{Collector, install_suspended_stack_roots, uninstall_suspended_stack_roots};
use crate::error::FiberError;
use crate::fiber::{ContextStack, Entry, ExecutionState, StackBounds, current_sp};
use crate::registry::BoundsRegistry;

/// Bytes below the recorded stack pointer that the switch itself writes
/// (saved callee registers and the switch frames). Scanned with the
/// suspended region.
const SWITCH_SPILL: usize = 512;

/// Identity of one of the two contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// The OS thread's original stack.
    Host,
    /// The explicitly allocated stack running the embedded runtime.
    Embedded,
}

impl ContextId {
    pub fn other(self) -> Self {
        match self {
            ContextId::Host => ContextId::Embedded,
            ContextId::Embedded => ContextId::Host,
        }
    }
}

type Body = Box<dyn FnOnce(&Yielder<'_>)>;

struct Shared {
    collector: Arc<dyn Collector>,
    registry: Arc<BoundsRegistry>,
    stack: ContextStack,
    suspended: Cell<Option<ExecutionState>>,
    running: Cell<ContextId>,
    finished: Cell<bool>,
    body: Cell<Option<Body>>,
    panic: Cell<Option<Box<dyn Any + Send>>>,
    switches: Cell<u64>,
}

impl Shared {
    fn switch_to(&self, target: ContextId) -> ContextId {
        let current = self.running.get();
        if target == current {
            return current;
        }
        let Some(state) = self.suspended.take() else {
            trace!(?target, "target context has finished");
            return current;
        };

        self.collector.lock();
        let sp = current_sp().saturating_sub(SWITCH_SPILL);
        let suspended = unsafe { self.registry.exchange(self.collector.as_ref(), sp) };
        self.running.set(target);
        self.switches.set(self.switches.get() + 1);
        trace!(from = ?current, to = ?target, ?suspended, "switching context");

        let (resumed_by, _) = unsafe { state.switch(self as *const Shared as usize) };
        self.resumed(resumed_by)
    }

    /// Runs on the stack that was just resumed; the lock is still held by
    /// the switch that brought us here.
    fn resumed(&self, resumed_by: ExecutionState) -> ContextId {
        if !self.finished.get() {
            self.suspended.set(Some(resumed_by));
        }
        unsafe { self.collector.unlock() };
        if let Some(payload) = self.panic.take() {
            panic::resume_unwind(payload);
        }
        self.running.get().other()
    }

    /// Final bookkeeping of the embedded context. Returns the host state to
    /// jump to, with the lock held.
    fn finish(&self) -> ExecutionState {
        self.finished.set(true);
        let Some(host) = self.suspended.take() else {
            error!("embedded context finished without a suspended host");
            std::process::abort();
        };
        self.collector.lock();
        let sp = current_sp().saturating_sub(SWITCH_SPILL);
        unsafe {
            self.registry.exchange(self.collector.as_ref(), sp);
            self.registry.retire();
        }
        self.running.set(ContextId::Host);
        self.switches.set(self.switches.get() + 1);
        info!(switches = self.switches.get(), "embedded context finished");
        host
    }
}

struct EmbeddedEntry;

impl Entry for EmbeddedEntry {
    fn run(caller: ExecutionState, data: usize) -> ExecutionState {
        let shared = unsafe { &*(data as *const Shared) };
        shared.suspended.set(Some(caller));
        unsafe { shared.collector.unlock() };
        debug!(stack = ?shared.stack.bounds(), "embedded context started");

        if let Some(body) = shared.body.take() {
            let yielder = Yielder { shared };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&yielder))) {
                error!("embedded context panicked");
                shared.panic.set(Some(payload));
            }
        }
        shared.finish()
    }
}

/// Handle given to the embedded body for switching back to the host.
pub struct Yielder<'a> {
    shared: &'a Shared,
}

impl Yielder<'_> {
    /// Suspends the embedded context until the next switch into it.
    pub fn yield_now(&self) {
        self.shared.switch_to(ContextId::Host);
    }

    /// Region the collector currently scans on behalf of the host.
    pub fn suspended_bounds(&self) -> StackBounds {
        self.shared.registry.suspended()
    }

    pub fn running(&self) -> ContextId {
        self.shared.running.get()
    }
}

impl fmt::Debug for Yielder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder")
            .field("running", &self.running())
            .finish()
    }
}

/// Cooperative scheduler for the host and embedded contexts.
pub struct Scheduler {
    shared: Box<Shared>,
}

impl Scheduler {
    /// Allocates the embedded stack and binds `body` as its entry. Nothing
    /// runs until the first switch into [`ContextId::Embedded`].
    pub fn new<F>(
        collector: Arc<dyn Collector>,
        stack_size: usize,
        body: F,
    ) -> Result<Self, FiberError>
    where
        F: FnOnce(&Yielder<'_>) + 'static,
    {
        let stack = ContextStack::new(stack_size)?;
        let registry = Arc::new(BoundsRegistry::new(stack.top()));
        collector.lock();
        unsafe {
            collector.set_stack_bottom(collector.main_stack_base());
            collector.unlock();
        }
        let embedded = ExecutionState::new::<EmbeddedEntry>(&stack);
        let body: Body = Box::new(body);
        info!(
            collector = collector.name(),
            stack = ?stack.bounds(),
            "embedded context created"
        );
        Ok(Self {
            shared: Box::new(Shared {
                collector,
                registry,
                stack,
                suspended: Cell::new(Some(embedded)),
                running: Cell::new(ContextId::Host),
                finished: Cell::new(false),
                body: Cell::new(Some(body)),
                panic: Cell::new(None),
                switches: Cell::new(0),
            }),
        })
    }

    /// Links the suspended-stack region into the collector's root scan.
    /// Returns `false` when it was already linked.
    pub fn install_root_scan(&self) -> bool {
        install_suspended_stack_roots(self.shared.collector.as_ref(), &self.shared.registry)
    }

    /// Suspends the running context and resumes `target`.
    ///
    /// Returns the identity of the context that switched back. When `target`
    /// is already running, or has finished, nothing happens and the caller's
    /// own identity is returned. A panic raised by the embedded body is
    /// re-raised here once control is back on the host.
    pub fn switch_to(&self, target: ContextId) -> ContextId {
        self.shared.switch_to(target)
    }

    pub fn running(&self) -> ContextId {
        self.shared.running.get()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.get()
    }

    pub fn suspended_bounds(&self) -> StackBounds {
        self.shared.registry.suspended()
    }

    pub fn embedded_stack(&self) -> StackBounds {
        self.shared.stack.bounds()
    }

    pub fn registry(&self) -> &Arc<BoundsRegistry> {
        &self.shared.registry
    }

    pub fn collector(&self) -> &Arc<dyn Collector> {
        &self.shared.collector
    }

    /// Total number of completed switches in either direction.
    pub fn switches(&self) -> u64 {
        self.shared.switches.get()
    }
}

impl Drop for Scheduler {
    /// Retires and unlinks the suspended record before the embedded stack is
    /// unmapped. A suspended embedded context is abandoned without unwinding.
    fn drop(&mut self) {
        let shared = &self.shared;
        if shared.running.get() == ContextId::Embedded {
            error!("scheduler dropped while its embedded context is running");
            std::process::abort();
        }
        shared.collector.lock();
        unsafe {
            uninstall_suspended_stack_roots(shared.collector.as_ref(), &shared.registry);
            shared.collector.unlock();
        }
        if !shared.finished.get() && shared.registry.exchanges() > 0 {
            warn!(switches = shared.switches.get(), "abandoning suspended embedded context");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.running())
            .field("finished", &self.is_finished())
            .field("switches", &self.switches())
            .field("suspended", &self.suspended_bounds())
            .finish()
    }
}
