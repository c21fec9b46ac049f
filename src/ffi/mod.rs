//=============================================
// fiberhost/src/ffi/mod.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: C ABI surface
// Objective: Export the yield entry point and the Node module registration
//=============================================

//! Foreign function interface helpers.

use std::ffi::c_void;

/// Opaque `napi_env`.
pub type NapiEnv = *mut c_void;
/// Opaque `napi_value`.
pub type NapiValue = *mut c_void;

/// Returns the generated C header for the exported symbols.
pub fn c_header() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/fiberhost.h"))
}

/// Hands control to the context that is not running. Called by the
/// embedded runtime from inside its main loop.
///
/// Returns 0 when a switch happened and control has come back, -1 when
/// there is no published bootstrap or nothing to switch to.
#[unsafe(no_mangle)]
pub extern "C" fn fiberhost_yield() -> i32 {
    match crate::bootstrap::process().and_then(|bootstrap| bootstrap.yield_now()) {
        Some(_) => 0,
        None => -1,
    }
}

#[cfg(feature = "napi-module")]
mod napi_module {
    use std::sync::Arc;

    use super::{NapiEnv, NapiValue};
    use crate::bootstrap;
    use crate::collector::boehm::BoehmCollector;

    /// Node's module registration entry.
    ///
    /// # Safety
    /// Called once by the host on its main thread with a live environment.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn napi_register_module_v1(
        env: NapiEnv,
        exports: NapiValue,
    ) -> NapiValue {
        unsafe { bootstrap::register_module(env, exports, Arc::new(BoehmCollector)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_declares_exported_symbols() {
        let header = c_header();
        assert!(header.contains("int32_t fiberhost_yield(void);"));
        assert!(header.contains("napi_register_module_v1"));
    }

    #[test]
    fn yield_without_bootstrap_reports_no_switch() {
        assert_eq!(fiberhost_yield(), -1);
    }
}
