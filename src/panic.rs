/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Rust-level panic handler.
//!
//! Grounded on `nucleus/src/panic.rs`: print the `PanicInfo`, then halt (or
//! exit via semihosting under `#[cfg(test)]`/the `qemu` feature). This is
//! the generic Rust `panic!()` path; the AArch64 synchronous-exception fatal
//! path (spec.md §4.1, with its ESR/ELR/FAR diagnostic and marker string)
//! is separate and lives in `exception::fatal_exception`.

use crate::{arch::endless_sleep, println};
use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::gpu::disable_graphics_output();
    println!("[!] Kernel panic: {}", info);
    halt()
}

#[cfg(not(feature = "qemu"))]
fn halt() -> ! {
    endless_sleep()
}

#[cfg(feature = "qemu")]
fn halt() -> ! {
    crate::qemu::semihosting_exit_failure()
}
