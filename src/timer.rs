/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Physical timer programming, per spec.md §4.4.

use crate::sync::NullLock;
use cortex_a::regs::*;
use core::sync::atomic::{AtomicU32, Ordering};

/// Default scheduler tick, per spec.md §4.5's scheduler `Start` contract.
pub const DEFAULT_TICK_MS: u32 = 10;

static TICK_MS: AtomicU32 = AtomicU32::new(DEFAULT_TICK_MS);

struct TimerState;
static TIMER: NullLock<TimerState> = NullLock::new(TimerState);

/// Program the physical timer with a `ms`-millisecond interval and enable
/// EL0/EL1 access to its control registers.
pub fn init(ms: u32) {
    TICK_MS.store(ms, Ordering::Relaxed);
    TIMER.lock(|_| reload());
    CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::SET);
}

/// Reload the timer-value register from the configured tick interval.
/// Called from the IRQ path on every timer interrupt.
pub fn timer_reset() {
    TIMER.lock(|_| reload());
}

fn reload() {
    let freq = CNTFRQ_EL0.get();
    let ms = TICK_MS.load(Ordering::Relaxed) as u64;
    let ticks = freq * ms / 1000;
    CNTP_TVAL_EL0.set(ticks);
}

#[cfg(test)]
mod tests {
    #[test]
    fn default_tick_is_ten_milliseconds() {
        assert_eq!(super::DEFAULT_TICK_MS, 10);
    }
}
