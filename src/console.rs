/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! UART console.
//!
//! The UART is named in spec.md §1 as an external collaborator (a "byte
//! sink") but spec.md §6 gives its exact register layout, because the
//! kernel itself is the only thing that can drive ambient logging and the
//! panic diagnostic. Grounded on
//! `machine/src/platform/raspberrypi/device_driver/bcm/pl011_uart.rs`'s
//! register-block-behind-`MmioDerefWrapper` shape, adapted to the
//! virt-platform PL011 offsets spec.md gives.

use crate::mmio::MmioDerefWrapper;
use crate::sync::NullLock;
use core::fmt;
use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields, register_structs,
    registers::{ReadOnly, ReadWrite, WriteOnly},
};

register_bitfields! {
    u32,

    FR [
        TXFF OFFSET(5) NUMBITS(1) [], // TX FIFO full
        RXFE OFFSET(4) NUMBITS(1) [], // RX FIFO empty
    ],

    LCRH [
        WLEN OFFSET(5) NUMBITS(2) [
            EightBit = 0b11
        ],
        FEN OFFSET(4) NUMBITS(1) [],
    ],

    CR [
        RXE OFFSET(9) NUMBITS(1) [],
        TXE OFFSET(8) NUMBITS(1) [],
        UARTEN OFFSET(0) NUMBITS(1) [],
    ],
}

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => DR: ReadWrite<u32>),
        (0x04 => _reserved1),
        (0x18 => FR: ReadOnly<u32, FR::Register>),
        (0x1c => _reserved2),
        (0x24 => IBRD: WriteOnly<u32>),
        (0x28 => FBRD: WriteOnly<u32>),
        (0x2c => LCRH: WriteOnly<u32, LCRH::Register>),
        (0x30 => CR: WriteOnly<u32, CR::Register>),
        (0x34 => @END),
    }
}

struct PL011UartInner {
    registers: MmioDerefWrapper<RegisterBlock>,
}

impl PL011UartInner {
    /// # Safety
    ///
    /// `base_addr` must point at a mapped 4 KiB UART register window.
    const unsafe fn new(base_addr: usize) -> Self {
        Self {
            registers: MmioDerefWrapper::new(base_addr),
        }
    }

    /// Matches spec.md §6: integer=1, fractional=40, line=8N1+FIFO,
    /// control=UART+TX+RX.
    fn init(&mut self) {
        self.registers.IBRD.write(IBRD_BAUD_INT);
        self.registers.FBRD.write(FBRD_BAUD_FRAC);
        self.registers
            .LCRH
            .write(LCRH::WLEN::EightBit + LCRH::FEN::SET);
        self.registers
            .CR
            .write(CR::UARTEN::SET + CR::TXE::SET + CR::RXE::SET);
    }

    fn write_byte(&mut self, byte: u8) {
        while self.registers.FR.is_set(FR::TXFF) {
            core::hint::spin_loop();
        }
        self.registers.DR.set(byte as u32);
    }
}

const IBRD_BAUD_INT: u32 = 1;
const FBRD_BAUD_FRAC: u32 = 40;

impl fmt::Write for PL011UartInner {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

pub struct PL011Uart {
    inner: NullLock<PL011UartInner>,
}

impl PL011Uart {
    /// # Safety
    ///
    /// `base_addr` must point at a mapped 4 KiB UART register window, per
    /// spec.md §4.3's MMIO mapping contract.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            inner: NullLock::new(PL011UartInner::new(base_addr)),
        }
    }

    pub fn init(&self) {
        self.inner.lock(|u| u.init());
    }

    pub fn write_fmt_locked(&self, args: fmt::Arguments) {
        use fmt::Write;
        self.inner.lock(|u| {
            let _ = u.write_fmt(args);
        });
    }
}

/// Physical base address of the virt-platform PL011, as exposed by QEMU's
/// `virt` machine's device tree (`/pl011@9000000`).
pub const UART_BASE: usize = 0x0900_0000;

/// The global console. Every caller must hold [`crate::sync::IrqGuard`] for
/// the duration of the call, per spec.md §5's shared-resource policy.
pub static CONSOLE: PL011Uart = unsafe { PL011Uart::new(UART_BASE) };

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let _guard = crate::sync::IrqGuard::new();
    CONSOLE.write_fmt_locked(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ({
        $crate::console::_print(format_args!($($arg)*));
        $crate::print!("\n");
    })
}
