/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The common GPU interface behind which the VirtIO-GPU driver and the
//! framebuffer fallback are interchangeable, per spec.md §4.7's "Fallback
//! path": "a capability swap behind a common gpu interface exposing
//! {clear, draw_pixel, fill_rect, draw_line, draw_char, draw_string,
//! flush, screen_size}".

use crate::sync::NullLock;

pub trait Gpu {
    fn clear(&mut self, color: u32);
    fn draw_pixel(&mut self, x: u32, y: u32, color: u32);
    fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: u32);
    fn draw_line(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: u32);
    fn draw_char(&mut self, x: u32, y: u32, c: u8, color: u32);
    fn draw_string(&mut self, x: u32, y: u32, s: &str, color: u32);
    fn flush(&mut self);
    fn screen_size(&self) -> (u32, u32);
}

/// Which concrete driver is behind the common interface. An enum rather
/// than `dyn Gpu` keeps this `no_std`-friendly without needing a vtable
/// allocation strategy, while still giving every caller one call site.
enum Driver {
    None,
    VirtioGpu(crate::virtio_gpu::VirtioGpu),
    Framebuffer(crate::framebuffer::Framebuffer),
}

impl Driver {
    fn as_gpu_mut(&mut self) -> Option<&mut dyn Gpu> {
        match self {
            Driver::None => None,
            Driver::VirtioGpu(g) => Some(g),
            Driver::Framebuffer(g) => Some(g),
        }
    }
}

static ACTIVE: NullLock<Driver> = NullLock::new(Driver::None);

/// Probe for a VirtIO-GPU device; fall back to the software framebuffer
/// (via `etc/ramfb`) if none is found, per spec.md §4.7/§7 error kind 3.
pub fn init() {
    match crate::virtio_gpu::probe_and_init() {
        Ok(gpu) => {
            ACTIVE.lock(|a| *a = Driver::VirtioGpu(gpu));
        }
        Err(e) => {
            crate::println!("[!] no VirtIO-GPU found ({:?}), falling back to framebuffer", e);
            let fb = crate::framebuffer::Framebuffer::probe_and_init();
            ACTIVE.lock(|a| *a = Driver::Framebuffer(fb));
        }
    }
}

/// Run `f` with the active GPU driver, if one has been initialized.
pub fn with_gpu<R>(f: impl FnOnce(&mut dyn Gpu) -> R) -> Option<R> {
    ACTIVE.lock(|a| a.as_gpu_mut().map(f))
}

/// Fatal-exception path per spec.md §4.1: disable the graphical output path
/// before writing the UART diagnostic. Craybond does this by simply
/// dropping the active driver reference rather than calling into it again
/// (the device may be the thing that's wedged).
pub fn disable_graphics_output() {
    ACTIVE.lock(|a| *a = Driver::None);
}
