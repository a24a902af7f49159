/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::nonstandard_macro_braces)] // https://github.com/shepmaster/snafu/issues/296

//! Craybond: a bare-metal AArch64 kernel for QEMU's `virt` machine.
//!
//! Module layout mirrors `metta-systems-vesper`'s split between
//! architecture primitives, device drivers, and kernel services, collapsed
//! into a single crate since spec.md names one coherent binary rather than
//! a library/bin split.

#[macro_use]
pub mod console;

pub mod arch;
pub mod boot;
pub mod device_tree;
pub mod exception;
pub mod font;
pub mod framebuffer;
pub mod fw_cfg;
pub mod gic;
pub mod gpu;
pub mod kernel;
pub mod memory;
pub mod mmio;
pub mod panic;
pub mod pci;
pub mod qemu;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod virtio_gpu;

use memory::mmu::{ATTR_DEVICE, ATTR_NORMAL_NONCACHEABLE};

/// The boot-screen task spawned by [`kmain`], per spec.md §2: draws a
/// simple scene to the active GPU driver in a loop.
///
/// Runs as a kernel task (spec.md §4.5's `SPSR_EL1H_MASKED`), so it has
/// direct, privileged access to [`gpu::with_gpu`] — unlike a relocated EL0
/// user task, it has no reason to route drawing through the PRINT syscall.
fn boot_screen_task() -> ! {
    let mut frame: u64 = 0;
    loop {
        gpu::with_gpu(|g| {
            let (w, h) = g.screen_size();
            g.clear(0xFF10_1010);
            g.fill_rect(w / 4, h / 4, w / 2, h / 2, 0xFF30_7FFF);
            g.draw_string(16, 16, "craybond", 0xFFFF_FFFF);
            g.flush();
        });
        frame = frame.wrapping_add(1);
        for _ in 0..10_000_000u32 {
            core::hint::spin_loop();
        }
    }
}

/// Map the regions named in spec.md §4.3's Initialization maps list, then
/// turn translation on.
fn init_mmu() {
    kernel::KERNEL.lock(|k| {
        k.root_table.lock(|root| {
            let kernel_start = memory::kernel_start();
            let kcode_end = memory::kcode_end();
            let mut va = memory::align_up(kernel_start, 0x20_0000) - 0x20_0000;
            // .text.boot.entry may start below a 2 MiB boundary; walk every
            // 2 MiB block that overlaps [kernel_start, kcode_end].
            if va + 0x20_0000 < kernel_start {
                va += 0x20_0000;
            }
            while va < kcode_end {
                root.map_2mb(va, va, ATTR_NORMAL_NONCACHEABLE, &k.permanent);
                va += 0x20_0000;
            }

            root.map_4kb(
                console::UART_BASE,
                console::UART_BASE,
                ATTR_DEVICE,
                memory::mmu::Permission::El1,
                &k.permanent,
            );

            let mut gicd = gic::GICD_BASE;
            while gicd < gic::GICD_BASE + gic::GICD_SIZE {
                root.map_4kb(gicd, gicd, ATTR_DEVICE, memory::mmu::Permission::El1, &k.permanent);
                gicd += memory::PAGE_SIZE;
            }

            let shared_start = memory::shared_start();
            let shared_end = memory::shared_end();
            let mut va = shared_start;
            while va < shared_end {
                root.map_4kb(
                    va,
                    va,
                    ATTR_NORMAL_NONCACHEABLE,
                    memory::mmu::Permission::Shared,
                    &k.permanent,
                );
                va += memory::PAGE_SIZE;
            }
        })
    });

    memory::mmu::post_mapping_barriers(true);

    kernel::KERNEL.lock(|k| {
        k.root_table.lock(|root| unsafe {
            memory::mmu::enable(root);
        })
    });
}

/// Kernel main: orchestrates boot in the fixed order spec.md §2 names, then
/// spawns the boot-screen task and starts the scheduler.
///
/// # Safety
///
/// Must run exactly once, from [`boot::_boot_cores`], after `.bss` has been
/// zeroed and before any exception can be taken.
pub unsafe fn kmain() -> ! {
    console::CONSOLE.init();
    println!("[i] craybond booting");

    kernel::init();
    init_mmu();
    println!("[i] mmu enabled");

    gic::init();
    exception::init();
    println!("[i] interrupts configured");

    gpu::init();
    println!("[i] gpu driver ready");

    sched::spawn_kernel(boot_screen_task as usize).expect("boot-screen task must fit in the process table");

    const TICK_MS: u32 = 10;
    sched::start(TICK_MS)
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Fn()]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test();
    }
    qemu::semihosting_exit_success();
}

#[cfg(test)]
#[no_mangle]
pub unsafe fn main() -> ! {
    test_main();
    qemu::semihosting_exit_success();
}
