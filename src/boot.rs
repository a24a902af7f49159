/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 *
 * Based on ideas from Jorge Aparicio, Andre Richter, Phil Oppenheimer, Sergio Benitez.
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Low-level processor boot: parks secondary cores, drops from EL2/EL3 to
//! EL1, zeroes `.bss`, and calls into [`crate::kmain`].
//!
//! Grounded on `nucleus/src/arch/aarch64/boot.rs`'s EL3/EL2-to-EL1 drop
//! sequence, trimmed to this kernel's single-core Non-goal (spec.md §1):
//! any core other than 0 parks forever instead of being prepared to run.

use crate::arch::endless_sleep;
use cortex_a::{asm, regs::*};

/// Stack top for EL1: `__virt_phys_binary_load_addr` in `linker.ld`, i.e. the
/// stack grows down from the kernel's load address into the 512 KiB gap
/// below it in RAM.
const STACK_START: u64 = 0x4008_0000;

#[link_section = ".text.boot"]
#[inline]
fn shared_setup_and_enter_pre() {
    CNTHCTL_EL2.write(CNTHCTL_EL2::EL1PCEN::SET + CNTHCTL_EL2::EL1PCTEN::SET);
    CNTVOFF_EL2.set(0);

    SCTLR_EL1.write(
        SCTLR_EL1::I::NonCacheable
            + SCTLR_EL1::C::NonCacheable
            + SCTLR_EL1::M::Disable
            + SCTLR_EL1::A::Disable
            + SCTLR_EL1::SA::Disable
            + SCTLR_EL1::SA0::Disable,
    );

    HCR_EL2.write(HCR_EL2::RW::EL1IsAarch64);
}

#[link_section = ".text.boot"]
#[inline]
fn shared_setup_and_enter_post() -> ! {
    SP_EL1.set(STACK_START);
    asm::eret()
}

#[link_section = ".text.boot"]
#[inline]
fn setup_and_enter_el1_from_el2() -> ! {
    SPSR_EL2.write(
        SPSR_EL2::D::Masked
            + SPSR_EL2::A::Masked
            + SPSR_EL2::I::Masked
            + SPSR_EL2::F::Masked
            + SPSR_EL2::M::EL1h,
    );
    ELR_EL2.set(reset as *const () as u64);
    shared_setup_and_enter_post()
}

#[cfg(feature = "qemu")]
#[link_section = ".text.boot"]
#[inline]
fn setup_and_enter_el1_from_el3() -> ! {
    SCR_EL3.write(SCR_EL3::RW::NextELIsAarch64 + SCR_EL3::NS::NonSecure);
    SPSR_EL3.write(
        SPSR_EL3::D::Masked
            + SPSR_EL3::A::Masked
            + SPSR_EL3::I::Masked
            + SPSR_EL3::F::Masked
            + SPSR_EL3::M::EL1h,
    );
    ELR_EL3.set(reset as *const () as u64);
    shared_setup_and_enter_post()
}

/// Entrypoint of the processor, invoked directly from `.text.boot.entry` by
/// the linker script.
///
/// # Safety
///
/// Totally unsafe! We're in the hardware land. No statics are accessed
/// before `reset()` zeroes `.bss`.
#[no_mangle]
#[link_section = ".text.boot.entry"]
pub unsafe extern "C" fn _boot_cores() -> ! {
    const CORE_0: u64 = 0;
    const CORE_MASK: u64 = 0x3;
    #[cfg(feature = "qemu")]
    const EL3: u32 = CurrentEL::EL::EL3.value;
    const EL2: u32 = CurrentEL::EL::EL2.value;
    const EL1: u32 = CurrentEL::EL::EL1.value;

    SP.set(STACK_START);

    shared_setup_and_enter_pre();

    if CORE_0 == MPIDR_EL1.get() & CORE_MASK {
        match CurrentEL.get() {
            #[cfg(feature = "qemu")]
            EL3 => setup_and_enter_el1_from_el3(),
            EL2 => setup_and_enter_el1_from_el2(),
            EL1 => reset(),
            _ => endless_sleep(),
        }
    }

    // spec.md §1 Non-goals exclude SMP: every core but 0 parks forever.
    endless_sleep()
}

/// Zero `.bss`, then hand off to [`crate::kmain`].
///
/// # Safety
///
/// We are guaranteed to be in EL1 non-secure mode here, with no statics
/// accessed before `.bss` is zeroed.
#[link_section = ".text.boot"]
unsafe fn reset() -> ! {
    extern "C" {
        static mut __BSS_START: u64;
        static mut __BSS_END: u64;
    }
    r0::zero_bss(&mut __BSS_START, &mut __BSS_END);

    crate::kmain()
}
