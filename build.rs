//! Build script for llama-bridge.
//!
//! In a production build, this would:
//! 1. Download or locate llama.cpp source
//! 2. Compile it for the target (CPU, Metal, or CUDA as available)
//! 3. Generate Rust FFI bindings via bindgen
//!
//! For now, it's a placeholder that documents the intended build process.
//! The `engine::llama` module ships a stub that simulates the engine so the
//! bridge can be exercised without the native library.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Future: compile llama.cpp and link it here.
    //
    // Steps:
    // 1. Locate or fetch the pinned llama.cpp revision
    // 2. Use cc::Build to compile the C/C++ sources
    // 3. Generate bindings with bindgen from llama.h
    // 4. Emit cargo:rustc-link-lib directives for the produced archive
}
