//=============================================
// fiberhost/src/ticks/uv.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: libuv idle-handle tick source
// Objective: Fire ticks from the Node event loop of the hosting process
//=============================================

//! Idle-handle ticks.
//!
//! Node runs an idle callback on every loop iteration while the handle is
//! active. The loop, handle and callback ABI come from the host executable,
//! so every entry point is looked up in the program image at subscription
//! time rather than linked.

use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use libloading::Library;
use tracing::{debug, error};

use super::{TickFn, TickHandle, TickSource};
use crate::error::TickError;
use crate::ffi::NapiEnv;

/// `UV_IDLE` in `uv_handle_type`.
const UV_IDLE: c_int = 6;

type UvLoop = c_void;
type UvIdle = c_void;
type UvIdleCb = unsafe extern "C" fn(*mut UvIdle);

type NapiGetUvEventLoop = unsafe extern "C" fn(NapiEnv, *mut *mut UvLoop) -> c_int;
type UvIdleInit = unsafe extern "C" fn(*mut UvLoop, *mut UvIdle) -> c_int;
type UvIdleStart = unsafe extern "C" fn(*mut UvIdle, UvIdleCb) -> c_int;
type UvHandleSize = unsafe extern "C" fn(c_int) -> usize;

/// Leading field shared by every libuv handle.
#[repr(C)]
struct UvHandleHead {
    data: *mut c_void,
}

/// Opens the executable image this module was loaded into.
pub(crate) fn program_image() -> Result<Library, TickError> {
    #[cfg(unix)]
    {
        Ok(Library::from(libloading::os::unix::Library::this()))
    }
    #[cfg(windows)]
    {
        libloading::os::windows::Library::this()
            .map(Library::from)
            .map_err(|err| TickError::ProgramImage(err.to_string()))
    }
}

fn host_symbol<T: Copy>(image: &Library, symbol: &'static str) -> Result<T, TickError> {
    unsafe { image.get::<T>(symbol.as_bytes()) }
        .map(|found| *found)
        .map_err(|err| TickError::MissingHostSymbol {
            symbol: symbol.to_string(),
            reason: err.to_string(),
        })
}

fn check(call: &'static str, status: c_int) -> Result<(), TickError> {
    if status == 0 {
        Ok(())
    } else {
        Err(TickError::HostCall { call, status })
    }
}

/// Tick source backed by a libuv idle handle on the Node event loop.
#[derive(Debug)]
pub struct UvIdleTicks {
    env: NapiEnv,
    get_uv_event_loop: NapiGetUvEventLoop,
    idle_init: UvIdleInit,
    idle_start: UvIdleStart,
    handle_size: UvHandleSize,
    // Keeps the resolved symbols valid.
    _image: Library,
}

impl UvIdleTicks {
    /// Resolves the host facilities needed to subscribe.
    ///
    /// # Safety
    /// `env` must be the live N-API environment of the calling thread.
    pub unsafe fn resolve(env: NapiEnv) -> Result<Self, TickError> {
        let image = program_image()?;
        Ok(Self {
            env,
            get_uv_event_loop: host_symbol(&image, "napi_get_uv_event_loop")?,
            idle_init: host_symbol(&image, "uv_idle_init")?,
            idle_start: host_symbol(&image, "uv_idle_start")?,
            handle_size: host_symbol(&image, "uv_handle_size")?,
            _image: image,
        })
    }
}

impl TickSource for UvIdleTicks {
    fn name(&self) -> &'static str {
        "uv-idle"
    }

    fn subscribe(&mut self, tick: TickFn) -> Result<TickHandle, TickError> {
        let mut event_loop: *mut UvLoop = ptr::null_mut();
        check("napi_get_uv_event_loop", unsafe {
            (self.get_uv_event_loop)(self.env, &mut event_loop)
        })?;

        // The handle lives for the rest of the process, so its storage is
        // leaked, and so is the callback it points at.
        let size = unsafe { (self.handle_size)(UV_IDLE) };
        let words = size.div_ceil(std::mem::size_of::<u64>()).max(1);
        let storage: &'static mut [u64] = Box::leak(vec![0u64; words].into_boxed_slice());
        let handle = storage.as_mut_ptr() as *mut UvIdle;

        check("uv_idle_init", unsafe { (self.idle_init)(event_loop, handle) })?;
        let callback: *mut TickFn = Box::into_raw(Box::new(tick));
        unsafe { (*(handle as *mut UvHandleHead)).data = callback as *mut c_void };
        check("uv_idle_start", unsafe { (self.idle_start)(handle, on_idle) })?;

        debug!(size, "idle handle started");
        Ok(TickHandle::new(self.name()))
    }
}

unsafe extern "C" fn on_idle(handle: *mut UvIdle) {
    let callback = unsafe { (*(handle as *mut UvHandleHead)).data } as *mut TickFn;
    if callback.is_null() {
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe { (*callback)() }));
    if outcome.is_err() {
        error!("tick callback panicked; aborting");
        std::process::abort();
    }
}
