/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Exception vector install, context save/restore layout, synchronous/IRQ
//! entry, and the fatal diagnostic path.
//!
//! Grounded on `nucleus/src/arch/aarch64/traps.rs` (`set_vbar_el1_checked`,
//! the `ExceptionContext`/`GPR` shape, `global_asm!(include_str!(...))`) and
//! `NeilAllavarpu-Rasperry-Pi-OS`'s `exception/mod.rs` (exhaustive
//! `ExceptionClass` dispatch, the IRQ/GIC ack-and-EOI sequence).

use crate::arch::isb;
use crate::{gic, println, sched};
use cortex_a::regs::{RegisterReadOnly, RegisterReadWrite, ESR_EL1, FAR_EL1, VBAR_EL1};

core::arch::global_asm!(include_str!("vectors.S"));

/// Saved exception context, laid out to match the store/load offsets in
/// `vectors.S` exactly: 30 general-purpose registers (x0..x29), the link
/// register (x30), SPSR_EL1, ELR_EL1, and SP_EL0 (the interrupted task's own
/// stack pointer, banked separately from the handler's SP_EL1).
///
/// This is the register-file half of spec.md §3's task descriptor; the
/// scheduler copies these fields into/out of the current task's descriptor
/// on every entry/exit.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct ExceptionContext {
    pub gpr: [u64; 30],
    pub lr: u64,
    pub spsr_el1: u64,
    pub elr_el1: u64,
    pub sp_el0: u64,
}

/// Install `vec_base_addr` as VBAR_EL1. Checked for the architecturally
/// required 2 KiB alignment.
///
/// # Safety
///
/// Totally unsafe in the land of the hardware.
pub unsafe fn set_vbar_el1_checked(vec_base_addr: u64) -> Result<(), ()> {
    if vec_base_addr.trailing_zeros() < 11 {
        return Err(());
    }
    VBAR_EL1.set(vec_base_addr);
    isb();
    Ok(())
}

/// Point VBAR_EL1 at the vector table assembled from `vectors.S`.
pub fn init() {
    extern "C" {
        static __exception_vectors_start: u8;
    }
    let base = unsafe { &__exception_vectors_start as *const u8 as u64 };
    unsafe {
        set_vbar_el1_checked(base).expect("vector table must be 2 KiB aligned");
    }
}

/// Reason the scheduler was entered, per the design notes' call for a
/// tagged variant instead of branching on a reason argument everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    Interrupt,
    Yield,
}

const CRAYBOND_PANIC_MARKER: &str = "*** CRAYON DOESN'T DRAW ANYMORE ***";

/// Synchronous/FIQ/SError at EL1: fatal under spec.md §4.1. Prints the
/// marker string, ESR/ELR/FAR, disables the GPU output path, and halts.
fn fatal_exception(kind: &str, e: &ExceptionContext) -> ! {
    crate::gpu::disable_graphics_output();
    println!("{}", CRAYBOND_PANIC_MARKER);
    println!("{}", kind);
    println!("      ESR_EL1: {:#010x} (syndrome)", ESR_EL1.get());
    println!("           EC: {:#08b} (cause)", ESR_EL1.read(ESR_EL1::EC));
    println!("      ELR_EL1: {:#018x}", e.elr_el1);
    println!("      FAR_EL1: {:#018x} (location)", FAR_EL1.get());
    println!("System Halted");
    crate::arch::endless_sleep()
}

#[no_mangle]
unsafe extern "C" fn current_el0_synchronous(e: &mut ExceptionContext) {
    sched::save_current_context(e);
    crate::syscall::handle(e);
    sched::restore_current_context(e);
}

#[no_mangle]
unsafe extern "C" fn current_el0_irq(e: &mut ExceptionContext) {
    current_elx_irq(e)
}

#[no_mangle]
unsafe extern "C" fn current_elx_synchronous(e: &mut ExceptionContext) -> ! {
    fatal_exception("Synchronous (EL1)", e)
}

#[no_mangle]
unsafe extern "C" fn current_elx_irq(e: &mut ExceptionContext) {
    sched::save_current_context(e);
    if let Some(reason) = gic::handle_irq() {
        sched::switch_proc(reason, e);
    }
}

#[no_mangle]
unsafe extern "C" fn current_elx_serror(e: &mut ExceptionContext) -> ! {
    fatal_exception("SError (EL1)", e)
}

#[no_mangle]
unsafe extern "C" fn current_elx_fiq(e: &mut ExceptionContext) -> ! {
    fatal_exception("FIQ (EL1)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch64_synchronous(e: &mut ExceptionContext) {
    current_el0_synchronous(e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch64_irq(e: &mut ExceptionContext) {
    current_elx_irq(e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch64_serror(e: &mut ExceptionContext) -> ! {
    fatal_exception("SError (lower EL, AArch64)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch64_fiq(e: &mut ExceptionContext) -> ! {
    fatal_exception("FIQ (lower EL, AArch64)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch32_synchronous(e: &mut ExceptionContext) -> ! {
    fatal_exception("Synchronous (lower EL, AArch32 unsupported)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch32_irq(e: &mut ExceptionContext) -> ! {
    fatal_exception("IRQ (lower EL, AArch32 unsupported)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch32_fiq(e: &mut ExceptionContext) -> ! {
    fatal_exception("FIQ (lower EL, AArch32 unsupported)", e)
}

#[no_mangle]
unsafe extern "C" fn lower_aarch32_serror(e: &mut ExceptionContext) -> ! {
    fatal_exception("SError (lower EL, AArch32 unsupported)", e)
}
