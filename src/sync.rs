/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Single-core synchronization primitives.
//!
//! Craybond never runs more than one core (see spec's SMP non-goal), so the
//! only real hazard is an interrupt handler observing a kernel static
//! mid-mutation. `NullLock` below is safe only because of that assumption;
//! `IrqGuard` is what actually provides the exclusion by masking IRQs for
//! the guard's lifetime.

use core::cell::UnsafeCell;
use cortex_a::{asm::barrier, regs::*};

/// A lock that does no actual locking.
///
/// Sound only because Craybond is single-core and every caller that must be
/// exclusive with respect to interrupt handlers wraps its critical section
/// in an [`IrqGuard`] first.
pub struct NullLock<T> {
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for NullLock<T> {}

impl<T> NullLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
        }
    }

    /// Run `f` with exclusive access to the wrapped value.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let data = unsafe { &mut *self.data.get() };
        f(data)
    }
}

/// RAII guard that masks IRQs (DAIF bit 2) on construction and restores the
/// previous mask on drop.
///
/// This is the "scoped acquisition of interrupts-disabled" object called for
/// by the design notes: every exit path (return, panic unwind is not a
/// concern since this crate aborts on panic) restores the prior mask.
pub struct IrqGuard {
    saved_daif: u64,
}

impl IrqGuard {
    #[must_use]
    pub fn new() -> Self {
        let saved_daif = DAIF.get();
        disable_irq();
        Self { saved_daif }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        DAIF.set(self.saved_daif);
        unsafe { barrier::isb(barrier::SY) };
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Mask IRQs (DAIF.I). Idempotent: masking an already-masked core is a no-op
/// other than the barrier.
pub fn disable_irq() {
    unsafe {
        core::arch::asm!("msr daifset, #2");
        barrier::isb(barrier::SY);
    }
}

/// Unmask IRQs (DAIF.I). Idempotent for the same reason.
pub fn enable_irq() {
    unsafe {
        core::arch::asm!("msr daifclr, #2");
        barrier::isb(barrier::SY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_lock_runs_closure_with_mutable_access() {
        let lock = NullLock::new(5u32);
        let result = lock.lock(|v| {
            *v += 1;
            *v
        });
        assert_eq!(result, 6);
        assert_eq!(lock.lock(|v| *v), 6);
    }
}
