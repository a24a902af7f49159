/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Binary entry point.
//!
//! All real code lives in the `craybond` library crate. The actual
//! hardware entry symbol is [`craybond::boot::_boot_cores`], a `#[no_mangle]`
//! function the linker script points `ENTRY` at directly; this crate exists
//! only so `cargo build` produces a linked executable that pulls it in.

#![no_std]
#![no_main]

use craybond as _;
