//=============================================
// fiberhost/src/runtime/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Embedded runtime loading
// Objective: Open the application runtime and call its blocking entry point
//=============================================

//! Embedded runtimes.
//!
//! The embedded runtime is opaque: it is opened, its entry point is called
//! once on the embedded stack, and whatever it returns is its exit code. The
//! entry point yields back to the host on its own, either through the
//! [`Yielder`] it is handed or through the exported `fiberhost_yield`.

pub mod dylib;

pub use dylib::{DylibLoader, EntryAbi, module_dir, module_path};

use crate::error::LoadError;
use crate::scheduler::Yielder;

/// Opens an embedded runtime.
pub trait RuntimeLoader {
    /// Human readable description for diagnostics.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Box<dyn EmbeddedRuntime>, LoadError>;
}

/// A loaded runtime, ready to run its main loop.
pub trait EmbeddedRuntime {
    /// Runs the main loop to completion on the embedded stack and returns
    /// its exit code. Backing resources are released before returning.
    fn run(self: Box<Self>, yielder: &Yielder<'_>) -> i32;
}
