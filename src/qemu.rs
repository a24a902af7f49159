/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! QEMU semihosting exit, used by the custom test harness and by the `qemu`
//! feature's panic/halt path.
//!
//! Grounded on `nucleus/src/qemu.rs`.

use qemu_exit::QEMUExit;

const AARCH64_EXIT: qemu_exit::AArch64 = qemu_exit::AArch64::new();

pub fn semihosting_exit_success() -> ! {
    AARCH64_EXIT.exit_success()
}

pub fn semihosting_exit_failure() -> ! {
    AARCH64_EXIT.exit_failure()
}
