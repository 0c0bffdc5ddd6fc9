//! Build script for llaisys-ffi.
//!
//! With the `link` feature enabled this links against `libllaisys`,
//! searching `LLAISYS_LIB_DIR` and then `$LLAISYS_PATH/lib`.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LLAISYS_PATH");
    println!("cargo:rerun-if-env-changed=LLAISYS_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_LINK").is_none() {
        return;
    }

    let lib_dir = std::env::var("LLAISYS_LIB_DIR")
        .ok()
        .or_else(|| {
            std::env::var("LLAISYS_PATH")
                .ok()
                .map(|root| format!("{}/lib", root))
        });

    match lib_dir {
        Some(dir) => println!("cargo:rustc-link-search=native={}", dir),
        None => println!(
            "cargo:warning=neither LLAISYS_LIB_DIR nor LLAISYS_PATH is set, relying on the system linker path"
        ),
    }
    println!("cargo:rustc-link-lib=dylib=llaisys");
}
