use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("out dir"));

    let header = r#"#ifndef FIBERHOST_C_API_H
#define FIBERHOST_C_API_H

#include <stdint.h>

#ifdef __cplusplus
extern "C" {
#endif

typedef struct napi_env__ *napi_env;
typedef struct napi_value__ *napi_value;

/* Hands control to the other context. Returns 0 when a switch happened. */
int32_t fiberhost_yield(void);

/* Optional hook resolved from the host image after bootstrap. */
typedef napi_value (*fiberhost_register_exports_fn)(napi_env env, napi_value exports);

napi_value napi_register_module_v1(napi_env env, napi_value exports);

#ifdef __cplusplus
}
#endif

#endif /* FIBERHOST_C_API_H */
"#;

    fs::write(out_dir.join("fiberhost.h"), header).expect("write header");

    // The collector symbols live in the host image and are bound at load time.
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "macos" && env::var_os("CARGO_FEATURE_BDWGC").is_some() {
        println!("cargo:rustc-cdylib-link-arg=-Wl,-undefined,dynamic_lookup");
    }

    // Let runtimes loaded by the standalone binary bind `fiberhost_yield`.
    match target_os.as_str() {
        "linux" | "android" | "freebsd" => {
            println!("cargo:rustc-link-arg-bin=fiberhost=-Wl,--export-dynamic")
        }
        "macos" => println!("cargo:rustc-link-arg-bin=fiberhost=-Wl,-export_dynamic"),
        _ => {}
    }

    println!("cargo:rerun-if-changed=build.rs");
}
