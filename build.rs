//! Passes the linker script to the linker for both the lib's test harness
//! binary and the `craybond` binary target.

const LINKER_SCRIPT: &str = "linker.ld";

fn main() {
    println!("cargo:rerun-if-changed={}", LINKER_SCRIPT);
    println!("cargo:rustc-link-arg=--script={}", LINKER_SCRIPT);
}
