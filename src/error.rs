//=============================================
// fiberhost/src/error.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Error taxonomy for startup-time failures
// Objective: Separate library, host-facility and stack failures
//=============================================

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing an execution context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FiberError {
    #[error("failed to allocate a {size}-byte context stack: {reason}")]
    StackAllocation { size: usize, reason: String },
}

/// Errors raised while opening the embedded runtime's backing library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to open library '{}': {reason}", .path.display())]
    OpenLibrary { path: PathBuf, reason: String },
    #[error("library '{}' has no entry symbol '{symbol}': {reason}", .path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        reason: String,
    },
    #[error("argument '{0}' contains an interior NUL byte")]
    InvalidArgument(String),
}

/// Errors raised while subscribing to the host's periodic callback facility.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TickError {
    #[error("host program image could not be opened: {0}")]
    ProgramImage(String),
    #[error("host symbol '{symbol}' is unavailable: {reason}")]
    MissingHostSymbol { symbol: String, reason: String },
    #[error("host call '{call}' failed with status {status}")]
    HostCall { call: &'static str, status: i32 },
}

/// Umbrella error for the bootstrap sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Fiber(#[from] FiberError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Tick(#[from] TickError),
    #[error("bootstrap step '{step}' is not valid in phase {phase:?}")]
    InvalidPhase {
        step: &'static str,
        phase: crate::bootstrap::Phase,
    },
}
