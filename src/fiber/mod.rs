//=============================================
// fiberhost/src/fiber/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Context switch primitive
// Objective: Hide register/ABI detail behind an opaque saved execution state
//=============================================

//! Saved execution state and the stack-switching primitive.
//!
//! [`ExecutionState`] is the only way the rest of the crate touches another
//! native stack. It has exactly two operations: creating a state whose first
//! resumption enters an [`Entry`], and switching to a state. A state is
//! consumed by the switch that resumes it, so only its single owner can
//! resume it.

mod stack;

pub use stack::{ContextStack, StackBounds, current_sp};

use std::fmt;

use ::context::{Context, Transfer};

/// Entry point of a freshly created execution state.
///
/// `run` receives the state of whoever first switched in, plus the word
/// passed with that switch. The state it returns is resumed once more when
/// `run` completes; the finished state itself is never resumed again.
pub trait Entry {
    fn run(caller: ExecutionState, data: usize) -> ExecutionState;
}

/// Opaque, owned snapshot of a suspended native call stack.
pub struct ExecutionState(Context);

impl ExecutionState {
    /// Creates a state that starts executing `E::run` on `stack` when first
    /// switched to.
    ///
    /// The stack must outlive every switch into the returned state.
    pub fn new<E: Entry>(stack: &ContextStack) -> Self {
        let context = unsafe { Context::new(&stack.inner, launch::<E>) };
        Self(context)
    }

    /// Suspends the calling stack and resumes this state.
    ///
    /// Returns when some stack switches back, yielding that stack's saved
    /// state and the word it passed along.
    ///
    /// # Safety
    /// The stack backing this state must still be allocated, and the state
    /// must not belong to a context whose entry already completed.
    pub unsafe fn switch(self, data: usize) -> (ExecutionState, usize) {
        let Transfer { context, data } = unsafe { self.0.resume(data) };
        (ExecutionState(context), data)
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState").finish_non_exhaustive()
    }
}

extern "C" fn launch<E: Entry>(transfer: Transfer) -> ! {
    let next = E::run(ExecutionState(transfer.context), transfer.data);
    unsafe {
        next.0.resume(0);
    }
    // Completed contexts have no frame to return into.
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static TRACE: Cell<usize> = const { Cell::new(0) };
    }

    struct Echo;

    impl Entry for Echo {
        fn run(caller: ExecutionState, data: usize) -> ExecutionState {
            TRACE.with(|t| t.set(data));
            let (caller, data) = unsafe { caller.switch(data + 1) };
            TRACE.with(|t| t.set(data));
            caller
        }
    }

    #[test]
    fn switch_round_trips_data_and_control() {
        let stack = ContextStack::new(64 * 1024).expect("stack");
        let state = ExecutionState::new::<Echo>(&stack);

        let (fiber, reply) = unsafe { state.switch(41) };
        assert_eq!(reply, 42);
        assert_eq!(TRACE.with(Cell::get), 41);

        let (_finished, reply) = unsafe { fiber.switch(7) };
        assert_eq!(reply, 0);
        assert_eq!(TRACE.with(Cell::get), 7);
    }
}
