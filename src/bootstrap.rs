//=============================================
// fiberhost/src/bootstrap.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Startup sequence and process lifecycle
// Objective: Create the embedded context, wire ticks and collector, and
//            terminate the process when the embedded runtime returns
//=============================================

//! Bootstrap.
//!
//! The sequence runs once per process:
//!
//! 1. [`Bootstrap::create_context`] allocates the embedded stack and binds
//!    the bridging routine that loads and runs the embedded runtime.
//! 2. [`Bootstrap::install`] links the suspended-stack region into the
//!    collector, subscribes the drive tick and installs the exit hook.
//! 3. [`Bootstrap::start`] switches into the embedded context once; the
//!    runtime initialises and yields back. From then on every tick performs
//!    exactly one switch.
//!
//! When the embedded runtime's entry returns, the next time the host side
//! observes it the process is terminated with the runtime's exit code.

use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::collector::Collector;
use crate::config::FiberConfig;
use crate::error::BootstrapError;
use crate::ffi::{NapiEnv, NapiValue};
use crate::logging;
use crate::runtime::{self, DylibLoader, RuntimeLoader};
use crate::scheduler::{ContextId, Scheduler, Yielder};
use crate::ticks::{TickHandle, TickSource, UvIdleTicks};

/// Bootstrap lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    EmbeddedContextCreated,
    FirstTickPending,
    Running,
    Terminated,
}

type Terminator = Box<dyn Fn(i32)>;

/// State shared between the bootstrap and the tick callback.
struct Driver {
    scheduler: Scheduler,
    phase: Rc<Cell<Phase>>,
    exit_code: Rc<Cell<Option<i32>>>,
    terminate: Terminator,
}

impl Driver {
    /// One drive tick: a single switch into the embedded context.
    fn drive(&self) {
        if self.phase.get() != Phase::Running {
            return;
        }
        self.scheduler.switch_to(ContextId::Embedded);
        self.observe();
    }

    fn observe(&self) {
        if !self.scheduler.is_finished() || self.phase.get() == Phase::Terminated {
            return;
        }
        self.phase.set(Phase::Terminated);
        let code = self.exit_code.get().unwrap_or(0);
        info!(code, switches = self.scheduler.switches(), "embedded runtime exited; terminating");
        (self.terminate)(code);
    }
}

/// One-shot startup sequence and owner of the process's scheduler.
pub struct Bootstrap {
    config: FiberConfig,
    collector: Arc<dyn Collector>,
    phase: Rc<Cell<Phase>>,
    exit_code: Rc<Cell<Option<i32>>>,
    terminate: Cell<Option<Terminator>>,
    driver: OnceCell<Rc<Driver>>,
    ticks: OnceCell<TickHandle>,
}

impl Bootstrap {
    pub fn new(config: FiberConfig, collector: Arc<dyn Collector>) -> Self {
        Self {
            config,
            collector,
            phase: Rc::new(Cell::new(Phase::Uninitialized)),
            exit_code: Rc::new(Cell::new(None)),
            terminate: Cell::new(None),
            driver: OnceCell::new(),
            ticks: OnceCell::new(),
        }
    }

    /// Replaces the action run when the embedded runtime exits. The default
    /// ends the process immediately with the runtime's exit code.
    pub fn with_terminator(self, terminate: impl Fn(i32) + 'static) -> Self {
        self.terminate.set(Some(Box::new(terminate)));
        self
    }

    fn expect_phase(&self, step: &'static str, expected: Phase) -> Result<(), BootstrapError> {
        let phase = self.phase.get();
        if phase == expected {
            Ok(())
        } else {
            Err(BootstrapError::InvalidPhase { step, phase })
        }
    }

    fn driver(&self, step: &'static str) -> Result<&Rc<Driver>, BootstrapError> {
        self.driver.get().ok_or(BootstrapError::InvalidPhase {
            step,
            phase: self.phase.get(),
        })
    }

    /// Allocates the embedded context with `loader` behind its entry.
    pub fn create_context(&self, loader: Box<dyn RuntimeLoader>) -> Result<(), BootstrapError> {
        self.expect_phase("create_context", Phase::Uninitialized)?;
        let body = bridge(loader, Rc::clone(&self.exit_code));
        let scheduler = Scheduler::new(Arc::clone(&self.collector), self.config.stack_size, body)?;
        let terminate = self
            .terminate
            .take()
            .unwrap_or_else(|| Box::new(terminate_process) as Terminator);
        let driver = Rc::new(Driver {
            scheduler,
            phase: Rc::clone(&self.phase),
            exit_code: Rc::clone(&self.exit_code),
            terminate,
        });
        if self.driver.set(driver).is_err() {
            return Err(BootstrapError::InvalidPhase {
                step: "create_context",
                phase: self.phase.get(),
            });
        }
        self.phase.set(Phase::EmbeddedContextCreated);
        Ok(())
    }

    /// Links the collector augmentation, subscribes the drive tick and
    /// installs the exit hook. Nothing has switched yet if this fails.
    pub fn install(&self, ticks: &mut dyn TickSource) -> Result<(), BootstrapError> {
        self.expect_phase("install", Phase::EmbeddedContextCreated)?;
        let driver = self.driver("install")?;
        if !driver.scheduler.install_root_scan() {
            debug!("suspended-stack roots were already linked");
        }

        let tick_driver = Rc::clone(driver);
        let handle = ticks.subscribe(Box::new(move || tick_driver.drive()))?;
        info!(source = handle.source(), id = handle.id(), "drive tick subscribed");
        // Only reachable once per bootstrap because of the phase check.
        let _ = self.ticks.set(handle);

        if self.config.host.immediate_exit && !install_exit_hook() {
            warn!("immediate-exit hook could not be registered");
        }
        self.phase.set(Phase::FirstTickPending);
        Ok(())
    }

    /// Performs the first switch into the embedded context and returns the
    /// phase once control is back on the host.
    pub fn start(&self) -> Result<Phase, BootstrapError> {
        self.expect_phase("start", Phase::FirstTickPending)?;
        let driver = self.driver("start")?;
        self.phase.set(Phase::Running);
        info!("entering embedded context");
        driver.drive();
        Ok(self.phase.get())
    }

    /// Hands control to whichever context is not running. Returns the
    /// context that eventually switched back, or `None` when no switch
    /// happened.
    pub fn yield_now(&self) -> Option<ContextId> {
        let driver = self.driver.get()?;
        if !matches!(self.phase.get(), Phase::Running) {
            return None;
        }
        let scheduler = &driver.scheduler;
        let current = scheduler.running();
        let from = scheduler.switch_to(current.other());
        if from == current {
            return None;
        }
        if scheduler.running() == ContextId::Host {
            driver.observe();
        }
        Some(from)
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Exit code of the embedded runtime once its entry has returned.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get()
    }

    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.driver.get().map(|driver| &driver.scheduler)
    }

    pub fn tick_handle(&self) -> Option<&TickHandle> {
        self.ticks.get()
    }

    pub fn config(&self) -> &FiberConfig {
        &self.config
    }

    /// Makes this the process instance reachable from `fiberhost_yield`.
    /// The instance lives until the process ends. If one was already
    /// published, that one is returned and `self` is discarded.
    pub fn publish(self) -> &'static Bootstrap {
        PROCESS.with(|slot| {
            if let Some(existing) = slot.get() {
                warn!("a bootstrap was already published; keeping the first one");
                return *existing;
            }
            let leaked: &'static Bootstrap = Box::leak(Box::new(self));
            let _ = slot.set(leaked);
            leaked
        })
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("phase", &self.phase())
            .field("collector", &self.collector.name())
            .field("exit_code", &self.exit_code())
            .field("scheduler", &self.scheduler())
            .finish()
    }
}

thread_local! {
    static PROCESS: OnceCell<&'static Bootstrap> = const { OnceCell::new() };
}

/// The published bootstrap of this thread, if any.
pub fn process() -> Option<&'static Bootstrap> {
    PROCESS.with(|slot| slot.get().copied())
}

/// The routine bound as the embedded context's entry.
fn bridge(
    loader: Box<dyn RuntimeLoader>,
    exit_code: Rc<Cell<Option<i32>>>,
) -> impl FnOnce(&Yielder<'_>) + 'static {
    move |yielder| {
        info!(runtime = %loader.describe(), "loading embedded runtime");
        let runtime = loader.load().unwrap_or_else(|err| fatal(&err));
        let code = runtime.run(yielder);
        info!(code, "embedded runtime returned");
        exit_code.set(Some(code));
    }
}

/// Logs `err` and aborts the process.
pub fn fatal(err: &dyn Error) -> ! {
    error!(%err, "fatal startup failure");
    eprintln!("fiberhost: fatal: {err}");
    std::process::abort()
}

fn terminate_process(code: i32) {
    unsafe { libc::_exit(code) }
}

extern "C" fn exit_immediately() {
    unsafe { libc::_exit(0) }
}

/// Replaces the remainder of normal process exit with `_exit(0)`, so no
/// static destructors or host teardown run against a suspended embedded
/// stack. Registered at most once per process.
pub fn install_exit_hook() -> bool {
    static INSTALLED: once_cell::sync::OnceCell<bool> = once_cell::sync::OnceCell::new();
    *INSTALLED.get_or_init(|| unsafe { libc::atexit(exit_immediately) } == 0)
}

type ExportRegistrar = unsafe extern "C" fn(NapiEnv, NapiValue) -> NapiValue;

fn export_registrar() -> Option<ExportRegistrar> {
    let image = crate::ticks::uv::program_image().ok()?;
    let registrar = unsafe { image.get::<ExportRegistrar>(b"fiberhost_register_exports") }.ok()?;
    Some(*registrar)
}

fn reject(err: &dyn Error) -> NapiValue {
    error!(%err, "fiberhost module initialisation failed");
    eprintln!("fiberhost: {err}");
    ptr::null_mut()
}

/// Module initialisation for a Node host: discovers config, resolves the
/// host's event loop, runs the bootstrap and hands `exports` to the
/// optional registrar. Returns null on failure.
///
/// # Safety
/// Must be called on the host's main thread with the live `env` and
/// `exports` passed to the module's registration function.
pub unsafe fn register_module(
    env: NapiEnv,
    exports: NapiValue,
    collector: Arc<dyn Collector>,
) -> NapiValue {
    let module_dir = runtime::module_dir();
    let (config, source) = match FiberConfig::discover(module_dir.as_deref()) {
        Ok(found) => found,
        Err(err) => {
            logging::init("fiberhost", "info");
            return reject(&*err);
        }
    };
    logging::init("fiberhost", &config.host.log_filter);
    info!(config = ?source, module_dir = ?module_dir, "fiberhost module loading");

    let loader = DylibLoader::from_config(&config.runtime, &module_dir.unwrap_or_default());
    let mut ticks = match unsafe { UvIdleTicks::resolve(env) } {
        Ok(ticks) => ticks,
        Err(err) => return reject(&err),
    };

    let bootstrap = Bootstrap::new(config, collector).publish();
    let started = bootstrap
        .create_context(Box::new(loader))
        .and_then(|_| bootstrap.install(&mut ticks))
        .and_then(|_| bootstrap.start());
    match started {
        Ok(phase) => debug!(?phase, "bootstrap finished"),
        Err(err) => return reject(&err),
    }

    match export_registrar() {
        Some(registrar) => unsafe { registrar(env, exports) },
        None => exports,
    }
}
