/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Tiny architecture-primitive wrappers, per the design notes' call to
//! replace raw inline assembly with a small set of named operations that
//! the rest of the kernel calls as ordinary routines.

use cortex_a::asm;
use cortex_a::asm::barrier;

/// Spin forever with the core in its lowest-power wait state between
/// iterations. Used as the terminal state after a fatal error.
pub fn endless_sleep() -> ! {
    loop {
        asm::wfe();
    }
}

/// Data Synchronization Barrier, inner-shareable, full system.
#[inline(always)]
pub fn dsb_ish() {
    unsafe { barrier::dsb(barrier::SY) };
}

/// Instruction Synchronization Barrier.
#[inline(always)]
pub fn isb() {
    unsafe { barrier::isb(barrier::SY) };
}

/// Invalidate the entire EL1 TLB, inner-shareable, per spec.md §5's
/// page-table-write ordering contract.
#[inline(always)]
pub fn tlbi_all() {
    unsafe {
        core::arch::asm!("tlbi vmalle1is");
    }
    dsb_ish();
    isb();
}

/// Invalidate the entire instruction cache (inner-shareable), required after
/// writing instruction pages per spec.md §5.
#[inline(always)]
pub fn ic_iallu() {
    unsafe {
        core::arch::asm!("ic iallu");
    }
    dsb_ish();
    isb();
}
