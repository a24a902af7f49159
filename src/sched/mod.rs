/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Process table and round-robin scheduler, per spec.md §3 (Task
//! descriptor, Process table) and §4.5.
//!
//! Grounded in shape on `metta-systems-vesper`'s `ExceptionContext`
//! register-file layout (`nucleus/src/arch/aarch64/traps.rs`); the
//! scheduling policy itself (fixed-capacity round robin over a READY
//! search) has no direct counterpart in the teacher, which never grew a
//! scheduler past a single `endless_sleep()` kernel task, so it is written
//! fresh against spec.md §4.5's exact algorithm.

pub mod relocate;

use crate::exception::{ExceptionContext, SwitchReason};
use crate::kernel::KERNEL;
use crate::memory::mmu::Permission;
use crate::memory::PAGE_SIZE;
use relocate::RelocationContext;

pub const CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
}

/// One task's saved register file plus scheduling metadata. Exactly one
/// descriptor per task; descriptors are never destroyed during kernel
/// lifetime, per spec.md §3.
#[derive(Debug, Clone, Copy)]
pub struct TaskDescriptor {
    pub gpr: [u64; 30],
    pub lr: u64,
    pub sp: u64,
    pub pc: u64,
    pub spsr: u64,
    pub id: u32,
    pub state: TaskState,
    /// `[el0_base, el0_limit)`: the task's own EL0-mapped code/data/stack
    /// span, per spec.md §4.6's pointer-validation requirement. Zero for a
    /// kernel task, which never takes a syscall from EL0.
    pub el0_base: u64,
    pub el0_limit: u64,
}

impl TaskDescriptor {
    const fn empty(id: u32) -> Self {
        Self {
            gpr: [0; 30],
            lr: 0,
            sp: 0,
            pc: 0,
            spsr: 0,
            id,
            state: TaskState::Blocked,
            el0_base: 0,
            el0_limit: 0,
        }
    }
}

/// EL1h, all DAIF bits masked: spec.md §4.5's kernel-task SPSR.
const SPSR_EL1H_MASKED: u64 = 0x3C5;
/// EL0t, interrupts enabled: spec.md §4.5's user-task SPSR.
const SPSR_EL0T: u64 = 0x0;

/// Fixed-capacity sequence of task descriptors plus a current-index and a
/// count, per spec.md §3's Process table invariant: indices in `[0,
/// count)` are valid, `count` is monotonically non-decreasing.
pub struct ProcessTable {
    tasks: [TaskDescriptor; CAPACITY],
    count: usize,
    current: usize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        let mut tasks = [TaskDescriptor::empty(0); CAPACITY];
        let mut i = 0;
        while i < CAPACITY {
            tasks[i] = TaskDescriptor::empty(i as u32);
            i += 1;
        }
        Self {
            tasks,
            count: 0,
            current: 0,
        }
    }

    /// Insert a new descriptor. Returns `None` without incrementing `count`
    /// if the table is already at capacity, per spec.md §8's boundary
    /// behavior.
    fn push(&mut self, descriptor: TaskDescriptor) -> Option<u32> {
        if self.count >= CAPACITY {
            return None;
        }
        let id = self.count as u32;
        self.tasks[self.count] = TaskDescriptor { id, ..descriptor };
        self.count += 1;
        Some(id)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn current_mut(&mut self) -> &mut TaskDescriptor {
        &mut self.tasks[self.current]
    }

    /// Round-robin selection starting from `(current + 1) mod count`,
    /// advancing until a READY descriptor is found or the search wraps
    /// back to `current` (a no-op switch), per spec.md §4.5.
    fn select_next(&mut self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let mut idx = (self.current + 1) % self.count;
        while idx != self.current {
            if self.tasks[idx].state == TaskState::Ready {
                return Some(idx);
            }
            idx = (idx + 1) % self.count;
        }
        None
    }
}

/// Allocate a 4 KiB kernel stack and register a READY kernel task, per
/// spec.md §4.5's "Spawn (kernel task)" contract.
pub fn spawn_kernel(entry: usize) -> Option<u32> {
    let stack_top = KERNEL.lock(|k| k.permanent.allocate(PAGE_SIZE)) + PAGE_SIZE;

    let descriptor = TaskDescriptor {
        pc: entry as u64,
        sp: stack_top as u64,
        spsr: SPSR_EL1H_MASKED,
        state: TaskState::Ready,
        ..TaskDescriptor::empty(0)
    };

    KERNEL.lock(|k| k.process_table.lock(|pt| pt.push(descriptor)))
}

/// Parameters for spawning a relocated EL0 user task, per spec.md §4.5's
/// "Spawn (user task)" contract.
pub struct UserTaskRequest<'a> {
    pub entry_offset: usize,
    pub code: &'a [u32],
    pub data: &'a [u8],
}

/// Allocate EL0-mapped code/data/stack regions, copy the data verbatim,
/// relocate the code as it copies it, and register a READY user task.
///
/// Returns the task id and any unsupported-relocation diagnostics
/// encountered (the caller decides whether those are fatal for this
/// particular task, per the design notes' "structured diagnostic instead
/// of printing" guidance).
pub fn spawn_user(req: UserTaskRequest) -> Option<u32> {
    let data_pages = crate::memory::align_up(req.data.len().max(1), PAGE_SIZE);
    let code_pages = crate::memory::align_up(req.code.len() * 4, PAGE_SIZE);
    let stack_pages = PAGE_SIZE;

    let dst_data_base = KERNEL.lock(|k| k.permanent.allocate(data_pages));
    let dst_code_base = KERNEL.lock(|k| k.permanent.allocate(code_pages));
    let stack_base = KERNEL.lock(|k| k.permanent.allocate(stack_pages));

    KERNEL.lock(|k| {
        k.root_table.lock(|root| {
            for page in (0..data_pages).step_by(PAGE_SIZE) {
                root.map_4kb(
                    dst_data_base + page,
                    dst_data_base + page,
                    crate::memory::mmu::ATTR_NORMAL_NONCACHEABLE,
                    Permission::El0,
                    &k.permanent,
                );
            }
            for page in (0..code_pages).step_by(PAGE_SIZE) {
                root.map_4kb(
                    dst_code_base + page,
                    dst_code_base + page,
                    crate::memory::mmu::ATTR_NORMAL_NONCACHEABLE,
                    Permission::El0,
                    &k.permanent,
                );
            }
            root.map_4kb(
                stack_base,
                stack_base,
                crate::memory::mmu::ATTR_NORMAL_NONCACHEABLE,
                Permission::El0,
                &k.permanent,
            );
        })
    });

    unsafe {
        core::ptr::copy_nonoverlapping(req.data.as_ptr(), dst_data_base as *mut u8, req.data.len());
    }

    let src_code_base = req.code.as_ptr() as u64;
    let ctx = RelocationContext {
        src_code_base,
        code_size: (req.code.len() * 4) as u64,
        dst_code_base: dst_code_base as u64,
        src_data_base: req.data.as_ptr() as u64,
        data_size: req.data.len() as u64,
        dst_data_base: dst_data_base as u64,
    };
    let dst_code = unsafe {
        core::slice::from_raw_parts_mut(dst_code_base as *mut u32, req.code.len())
    };
    let diagnostics = relocate::relocate(req.code, dst_code, &ctx);
    for d in diagnostics.iter() {
        crate::println!(
            "[!] spawn_user: unsupported relocation at offset {:#x}: {:?}",
            d.offset, d.reason
        );
    }

    let stack_top = stack_base + stack_pages;
    // Data, code, and stack are bump-allocated back to back, so the task's
    // whole EL0-mapped span is their convex hull; compute it from the three
    // regions rather than assuming a fixed allocation order.
    let el0_base = dst_data_base.min(dst_code_base).min(stack_base);
    let el0_limit = (dst_data_base + data_pages)
        .max(dst_code_base + code_pages)
        .max(stack_base + stack_pages);
    let descriptor = TaskDescriptor {
        pc: (dst_code_base + req.entry_offset) as u64,
        sp: stack_top as u64,
        spsr: SPSR_EL0T,
        state: TaskState::Ready,
        el0_base: el0_base as u64,
        el0_limit: el0_limit as u64,
        ..TaskDescriptor::empty(0)
    };

    KERNEL.lock(|k| k.process_table.lock(|pt| pt.push(descriptor)))
}

/// The currently running task's `[el0_base, el0_limit)` span, per spec.md
/// §4.6's syscall pointer-validation requirement. Called from
/// `current_el0_synchronous` before dispatching into [`crate::syscall`].
pub fn current_el0_range() -> (u64, u64) {
    KERNEL.lock(|k| {
        k.process_table.lock(|pt| {
            let t = pt.current_mut();
            (t.el0_base, t.el0_limit)
        })
    })
}

/// Copy the interrupted register file into the current task's descriptor,
/// per spec.md §4.1's context-save contract. `e.sp_el0` is the interrupted
/// level's stack pointer for an EL0t task (the only level `vectors.S`
/// actually banks out of the handler's own SP_EL1); kernel (EL1h) tasks run
/// with DAIF fully masked and are never preempted through this path, so the
/// field is harmless-but-unused for them.
pub fn save_current_context(e: &ExceptionContext) {
    KERNEL.lock(|k| {
        k.process_table.lock(|pt| {
            let t = pt.current_mut();
            t.gpr = e.gpr;
            t.lr = e.lr;
            t.sp = e.sp_el0;
            t.pc = e.elr_el1;
            t.spsr = e.spsr_el1;
        })
    });
}

/// Restore the current task's descriptor into the exception frame, per
/// spec.md §4.1's context-restore contract. Writes `t.sp` back into
/// `e.sp_el0`, which `__exception_restore_context` loads into SP_EL0 before
/// `eret`, so a resumed EL0t task lands back on its own stack.
pub fn restore_current_context(e: &mut ExceptionContext) {
    KERNEL.lock(|k| {
        k.process_table.lock(|pt| {
            let t = pt.current_mut();
            e.gpr = t.gpr;
            e.lr = t.lr;
            e.elr_el1 = t.pc;
            e.spsr_el1 = t.spsr;
            e.sp_el0 = t.sp;
        })
    });
}

/// Select the next READY task and restore it into the exception frame.
/// Used both by the IRQ path (preemption) and by cooperative yield, per
/// spec.md §4.5's unified exception-return-style restore.
pub fn switch_proc(_reason: SwitchReason, e: &mut ExceptionContext) {
    KERNEL.lock(|k| {
        k.process_table.lock(|pt| {
            pt.current_mut().state = TaskState::Ready;
            if let Some(next) = pt.select_next() {
                pt.current = next;
            }
            pt.current_mut().state = TaskState::Running;
        })
    });
    restore_current_context(e);
}

/// Cooperative yield: identical selection to [`switch_proc`], but intended
/// to be called from kernel code that synthesizes an exception frame on
/// its own stack first (per spec.md §4.5's "implementations that share one
/// restore routine must synthesize an exception frame" note). Craybond
/// takes that recommendation: there is exactly one restore routine,
/// [`restore_current_context`], and no separate plain-branch path.
pub fn switch_proc_yield(e: &mut ExceptionContext) {
    switch_proc(SwitchReason::Yield, e)
}

extern "C" {
    fn __exception_restore_context() -> !;
}

/// Disable IRQs, program the timer at `tick_ms`, and switch into the first
/// READY task, per spec.md §4.5's `Start` contract.
///
/// There is only one restore routine in this kernel
/// ([`restore_current_context`] plus the assembly in `exception/vectors.S`),
/// per the design notes' recommendation; starting the scheduler means
/// building an `ExceptionContext`-shaped frame by hand and branching into
/// that same restore path instead of a separate bespoke entry sequence.
pub fn start(tick_ms: u32) -> ! {
    crate::sync::disable_irq();
    crate::timer::init(tick_ms);

    let mut frame = unsafe { core::mem::zeroed::<ExceptionContext>() };
    switch_proc(SwitchReason::Yield, &mut frame);

    unsafe {
        let sp = &frame as *const ExceptionContext as u64;
        core::arch::asm!(
            "mov sp, {sp}",
            "b __exception_restore_context",
            sp = in(reg) sp,
            options(noreturn)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: u32) -> TaskDescriptor {
        TaskDescriptor {
            state: TaskState::Ready,
            ..TaskDescriptor::empty(id)
        }
    }

    #[test]
    fn push_beyond_capacity_returns_none_and_does_not_advance_count() {
        let mut pt = ProcessTable::new();
        for _ in 0..CAPACITY {
            assert!(pt.push(ready(0)).is_some());
        }
        assert_eq!(pt.count(), CAPACITY);
        assert!(pt.push(ready(0)).is_none());
        assert_eq!(pt.count(), CAPACITY);
    }

    #[test]
    fn select_next_wraps_and_skips_non_ready() {
        let mut pt = ProcessTable::new();
        pt.push(ready(0));
        let mut blocked = TaskDescriptor::empty(0);
        blocked.state = TaskState::Blocked;
        pt.push(blocked);
        pt.push(ready(0));

        pt.current = 0;
        let next = pt.select_next();
        assert_eq!(next, Some(2), "index 1 is blocked and must be skipped");
    }

    #[test]
    fn select_next_is_noop_when_only_current_is_ready() {
        let mut pt = ProcessTable::new();
        pt.push(ready(0));
        pt.tasks[0].state = TaskState::Running;
        pt.current = 0;
        assert_eq!(pt.select_next(), None);
    }
}
