/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The kernel aggregate: collects the genuinely global mutable state named
//! in the design notes (process table, current index, MMU root, allocator
//! bumps) into one place, owned by the boot routine and reached through
//! `&'static` references handed to subsystems rather than ad-hoc statics
//! scattered across modules.
//!
//! The GPU driver is the one deliberate exception: spec.md §3's ownership
//! paragraph states it "exclusively owns its virtqueues, command buffers,
//! and framebuffer", so it keeps its own encapsulated, `NullLock`-guarded
//! state in `crate::gpu` rather than living inside this aggregate.

use crate::memory::allocator::{PermanentAllocator, TemporaryAllocator};
use crate::memory::mmu::RootTable;
use crate::memory::{heap_bottom, heap_limit, TEMPORARY_ARENA_SIZE};
use crate::sched::ProcessTable;
use crate::sync::NullLock;

pub struct Kernel {
    pub permanent: PermanentAllocator,
    pub temporary: TemporaryAllocator,
    pub root_table: NullLock<RootTable>,
    pub process_table: NullLock<ProcessTable>,
}

impl Kernel {
    const fn uninitialized() -> Self {
        Self {
            permanent: PermanentAllocator::new(0, 0),
            temporary: TemporaryAllocator::new(0, 0),
            root_table: NullLock::new(RootTable::new()),
            process_table: NullLock::new(ProcessTable::new()),
        }
    }
}

/// The single kernel instance. Its allocator ranges are fixed up once by
/// [`init`] after the linker-script heap symbols are known to be valid
/// (they are not link-time constants, so `Kernel` cannot be built fully
/// `const` from them).
pub static KERNEL: NullLock<Kernel> = NullLock::new(Kernel::uninitialized());

/// Fix up the allocator ranges from the linker-provided heap layout, per
/// spec.md §3: temporary arena `[heap_bottom, heap_bottom+5 MiB)`,
/// permanent arena `[heap_bottom+5 MiB, heap_limit)`.
pub fn init() {
    let bottom = heap_bottom();
    let limit = heap_limit();
    let temp_end = bottom + TEMPORARY_ARENA_SIZE;

    KERNEL.lock(|k| {
        k.temporary = TemporaryAllocator::new(bottom, temp_end);
        k.permanent = PermanentAllocator::new(temp_end, limit);
    });
}
