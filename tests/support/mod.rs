//=============================================
// fiberhost/tests/support/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Shared helpers for integration tests
// Objective: Build heaps and scripted embedded runtimes for the scenarios
//=============================================

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use fiberhost::collector::mark_sweep::MarkSweepHeap;
use fiberhost::error::LoadError;
use fiberhost::runtime::{EmbeddedRuntime, RuntimeLoader};
use fiberhost::{FiberConfig, Yielder, current_sp};

/// XOR mask used to keep addresses out of conservative scans.
pub const MASK: usize = 0x5a5a_5a5a;

/// Stack size used by the scenarios.
pub const STACK_SIZE: usize = 256 * 1024;

/// Heap whose stack base sits above every frame the test body creates
/// after this call returns.
pub fn heap(threshold: usize) -> Arc<MarkSweepHeap> {
    Arc::new(MarkSweepHeap::new(current_sp()).with_threshold(threshold))
}

/// Config safe for in-process tests: small stack, no exit hook.
pub fn config() -> FiberConfig {
    let mut config = FiberConfig::default();
    config.stack_size = STACK_SIZE;
    config.host.immediate_exit = false;
    config
}

/// How a scripted runtime hands control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldVia {
    Yielder,
    Ffi,
}

/// Runtime that counts its resumptions, yields `steps` times and exits
/// with `code`.
pub struct Scripted {
    pub steps: u32,
    pub code: i32,
    pub via: YieldVia,
    pub resumptions: Rc<Cell<u32>>,
}

impl EmbeddedRuntime for Scripted {
    fn run(self: Box<Self>, yielder: &Yielder<'_>) -> i32 {
        for _ in 0..self.steps {
            self.resumptions.set(self.resumptions.get() + 1);
            match self.via {
                YieldVia::Yielder => yielder.yield_now(),
                YieldVia::Ffi => assert_eq!(fiberhost::ffi::fiberhost_yield(), 0),
            }
        }
        self.code
    }
}

pub struct ScriptedLoader {
    pub steps: u32,
    pub code: i32,
    pub via: YieldVia,
    pub resumptions: Rc<Cell<u32>>,
}

impl ScriptedLoader {
    pub fn new(steps: u32, code: i32) -> Self {
        Self {
            steps,
            code,
            via: YieldVia::Yielder,
            resumptions: Rc::new(Cell::new(0)),
        }
    }

    pub fn via(mut self, via: YieldVia) -> Self {
        self.via = via;
        self
    }
}

impl RuntimeLoader for ScriptedLoader {
    fn describe(&self) -> String {
        format!("scripted({} steps)", self.steps)
    }

    fn load(&self) -> Result<Box<dyn EmbeddedRuntime>, LoadError> {
        Ok(Box::new(Scripted {
            steps: self.steps,
            code: self.code,
            via: self.via,
            resumptions: Rc::clone(&self.resumptions),
        }))
    }
}
