//=============================================
// fiberhost/src/lib.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Two-context fiber host for an embedded runtime inside an event-loop host
// Objective: Expose the scheduler, collector hooks, tick sources and bootstrap
//=============================================

//! `fiberhost` runs an embedded application runtime (which owns its own main
//! loop) on a private native stack inside a host event-loop process, on the
//! host's OS thread. Control moves between the two stacks only at explicit
//! switch points, and a conservative collector is told which stack is
//! suspended at every switch so neither stack's roots are missed.

pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod error;
pub mod ffi;
pub mod fiber;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod ticks;

pub use bootstrap::{Bootstrap, Phase};
pub use collector::{Collector, RootContributor, RootScanChain, RootSink};
pub use config::FiberConfig;
pub use error::{BootstrapError, FiberError, LoadError, TickError};
pub use fiber::{ContextStack, ExecutionState, StackBounds, current_sp};
pub use registry::BoundsRegistry;
pub use scheduler::{ContextId, Scheduler, Yielder};
pub use ticks::{TickHandle, TickSource};
