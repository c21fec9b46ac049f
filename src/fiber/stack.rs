//=============================================
// fiberhost/src/fiber/stack.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Native stack ownership and address-range bookkeeping
// Objective: Allocate guarded context stacks and describe stack regions
//=============================================

use std::fmt;

use ::context::stack::ProtectedFixedSizeStack;

use crate::error::FiberError;

/// Half-open address range `[low, high)` of a native stack region.
///
/// Stacks grow downward on every supported target, so `low` is the most
/// recently pushed end and `high` is the stack bottom.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackBounds {
    pub low: usize,
    pub high: usize,
}

impl StackBounds {
    pub fn new(low: usize, high: usize) -> Self {
        debug_assert!(low <= high, "stack bounds inverted: {low:#x} > {high:#x}");
        Self { low, high }
    }

    /// Empty region anchored at `addr`.
    pub fn empty_at(addr: usize) -> Self {
        Self {
            low: addr,
            high: addr,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    pub fn len(&self) -> usize {
        self.high.saturating_sub(self.low)
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.low && addr < self.high
    }
}

impl fmt::Debug for StackBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackBounds({:#x}..{:#x})", self.low, self.high)
    }
}

/// Approximate stack pointer of the caller.
///
/// The returned address lies below every local of the calling frame, so
/// `[current_sp(), bottom)` covers the caller's live frames.
#[inline(never)]
pub fn current_sp() -> usize {
    let marker = 0usize;
    std::hint::black_box(&marker) as *const usize as usize
}

/// Guard-paged stack owned by the embedded context.
pub struct ContextStack {
    pub(super) inner: ProtectedFixedSizeStack,
}

impl ContextStack {
    /// Default stack size for the embedded context.
    pub const DEFAULT_SIZE: usize = 1024 * 1024;

    pub fn new(size: usize) -> Result<Self, FiberError> {
        let inner =
            ProtectedFixedSizeStack::new(size).map_err(|err| FiberError::StackAllocation {
                size,
                reason: format!("{err:?}"),
            })?;
        Ok(Self { inner })
    }

    /// Usable region of the stack, excluding the guard page.
    pub fn bounds(&self) -> StackBounds {
        StackBounds::new(self.inner.bottom() as usize, self.inner.top() as usize)
    }

    /// Highest address of the stack, where the first frame is pushed.
    pub fn top(&self) -> usize {
        self.inner.top() as usize
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("bounds", &self.bounds())
            .finish()
    }
}
