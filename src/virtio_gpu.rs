/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! VirtIO-GPU-over-PCI driver: capability discovery, virtqueue setup, the
//! status handshake, command submission, and the
//! GET_DISPLAY_INFO → RESOURCE_CREATE_2D → RESOURCE_ATTACH_BACKING →
//! SET_SCANOUT init sequence, per spec.md §4.7.
//!
//! Grounded in wire-protocol shape on the pack's `other_examples/`
//! VirtIO-GPU PCI drivers (descriptor/available/used ring layout, command
//! struct shapes); the command sequence, struct contracts, and status-bit
//! values follow spec.md §4.7/§6 exactly.

use crate::arch::dsb_ish;
use crate::gpu::Gpu;
use crate::kernel::KERNEL;
use crate::mmio::{read32, read8, write32, write8};
use crate::pci::{self, PciDevice, VirtioCapability, VirtioCfgType};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum GpuError {
    #[snafu(display("no VirtIO-GPU device found on the PCI bus"))]
    NoDevice,
    #[snafu(display("device did not accept FEATURES_OK"))]
    FeaturesNotSticky,
    #[snafu(display("no enabled scanout advertised by DISPLAY_INFO"))]
    NoScanout,
    #[snafu(display("unexpected response type {:#06x}, expected OK (0x1100)", got))]
    UnexpectedResponse { got: u32 },
}

// Wire-level command/response codes, per spec.md §6.
const CMD_GET_DISPLAY_INFO: u32 = 0x100;
const CMD_RESOURCE_CREATE_2D: u32 = 0x101;
const CMD_SET_SCANOUT: u32 = 0x102;
const CMD_RESOURCE_FLUSH: u32 = 0x103;
const CMD_TRANSFER_TO_HOST_2D: u32 = 0x104;
const CMD_RESOURCE_ATTACH_BACKING: u32 = 0x106;
const RESP_OK_NODATA: u32 = 0x1100;

const FORMAT_B8G8R8A8_UNORM: u32 = 1;

// Status bits, per spec.md §6.
const STATUS_ACKNOWLEDGE: u32 = 1;
const STATUS_DRIVER: u32 = 2;
const STATUS_DRIVER_OK: u32 = 4;
const STATUS_FEATURES_OK: u32 = 8;
#[allow(dead_code)]
const STATUS_FAILED: u32 = 0x80;

// VirtIO common-config register offsets (relative to the COMMON_CFG BAR
// window), per the VirtIO-over-PCI specification.
const COMMON_DEVICE_FEATURE_SELECT: usize = 0x00;
const COMMON_DEVICE_FEATURE: usize = 0x04;
const COMMON_DRIVER_FEATURE_SELECT: usize = 0x08;
const COMMON_DRIVER_FEATURE: usize = 0x0C;
const COMMON_QUEUE_SELECT: usize = 0x16;
const COMMON_QUEUE_SIZE: usize = 0x18;
const COMMON_QUEUE_ENABLE: usize = 0x1C;
const COMMON_QUEUE_DESC: usize = 0x20;
const COMMON_QUEUE_DRIVER: usize = 0x28;
const COMMON_QUEUE_DEVICE: usize = 0x30;
const COMMON_DEVICE_STATUS: usize = 0x14;

const QUEUE_SIZE: usize = 16;

const F_NEXT: u16 = 1;
const F_WRITE: u16 = 2;

#[repr(C)]
struct Descriptor {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
struct AvailRing {
    flags: u16,
    idx: u16,
    ring: [u16; QUEUE_SIZE],
}

#[repr(C)]
struct UsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct UsedRing {
    flags: u16,
    idx: u16,
    ring: [UsedElem; QUEUE_SIZE],
}

struct Virtqueue {
    desc: usize,
    avail: usize,
    used: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CtrlHeader {
    cmd_type: u32,
    flags: u32,
    fence_id: u64,
    ctx_id: u32,
    padding: u32,
}

#[repr(C)]
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
struct DisplayOne {
    rect: Rect,
    enabled: u32,
    flags: u32,
}

#[repr(C)]
struct DisplayInfoResp {
    header: CtrlHeader,
    modes: [DisplayOne; 16],
}

#[repr(C)]
struct ResourceCreate2d {
    header: CtrlHeader,
    resource_id: u32,
    format: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
struct MemEntry {
    addr: u64,
    length: u32,
    padding: u32,
}

#[repr(C)]
struct ResourceAttachBacking {
    header: CtrlHeader,
    resource_id: u32,
    nr_entries: u32,
    entry: MemEntry,
}

#[repr(C)]
struct SetScanout {
    header: CtrlHeader,
    rect: Rect,
    scanout_id: u32,
    resource_id: u32,
}

#[repr(C)]
struct TransferToHost2d {
    header: CtrlHeader,
    rect: Rect,
    offset: u64,
    resource_id: u32,
    padding: u32,
}

#[repr(C)]
struct ResourceFlush {
    header: CtrlHeader,
    rect: Rect,
    resource_id: u32,
    padding: u32,
}

const RESOURCE_ID: u32 = 1;

pub struct VirtioGpu {
    common_cfg: usize,
    notify_cfg: usize,
    notify_off_multiplier: u32,
    vq: Virtqueue,
    cmd_buf: usize,
    resp_buf: usize,
    framebuffer: usize,
    width: u32,
    height: u32,
    scanout_id: u32,
}

fn find_capability(
    device: &PciDevice,
    caps: &[Option<VirtioCapability>],
    want: VirtioCfgType,
) -> Option<(VirtioCapability, usize)> {
    let cap = caps.iter().flatten().find(|c| c.cfg_type == want)?;
    let bar_size = device.bar_size(cap.bar);
    let bar_value = device.bar_value(cap.bar);
    if bar_value == 0 {
        // unmapped: assign a fresh window sized to the probed BAR size
        let window_base = KERNEL.lock(|k| k.permanent.allocate(bar_size as usize));
        device.assign_bar(cap.bar, window_base as u32);
        Some((*cap, window_base + cap.offset as usize))
    } else {
        Some((*cap, (bar_value as usize & !0xF) + cap.offset as usize))
    }
}

/// Locate the device, walk its capabilities, and run the full init
/// sequence. Returns the driver ready to draw, or an error the caller
/// falls back on (spec.md §7 error kind 3).
pub fn probe_and_init() -> Result<VirtioGpu, GpuError> {
    let device = pci::find_device(pci::VIRTIO_GPU_VENDOR, pci::VIRTIO_GPU_DEVICE)
        .map_err(|_| GpuError::NoDevice)?;
    let caps = device.virtio_capabilities();

    let (_, common_cfg) =
        find_capability(&device, &caps, VirtioCfgType::Common).ok_or(GpuError::NoDevice)?;
    let (notify_cap, notify_cfg) =
        find_capability(&device, &caps, VirtioCfgType::Notify).ok_or(GpuError::NoDevice)?;
    let _ = find_capability(&device, &caps, VirtioCfgType::Isr);
    let _ = find_capability(&device, &caps, VirtioCfgType::Device);

    status_handshake(common_cfg)?;

    let vq = setup_virtqueue(common_cfg);

    let cmd_buf = KERNEL.lock(|k| k.permanent.allocate(core::mem::size_of::<TransferToHost2d>().max(256)));
    let resp_buf = KERNEL.lock(|k| k.permanent.allocate(core::mem::size_of::<DisplayInfoResp>()));

    unsafe { write_common_status(common_cfg, STATUS_DRIVER_OK) };

    let mut gpu = VirtioGpu {
        common_cfg,
        notify_cfg,
        notify_off_multiplier: notify_cap.notify_off_multiplier,
        vq,
        cmd_buf,
        resp_buf,
        framebuffer: 0,
        width: 0,
        height: 0,
        scanout_id: 0,
    };

    gpu.init_display()?;
    Ok(gpu)
}

fn read_common32(common_cfg: usize, offset: usize) -> u32 {
    unsafe { read32(common_cfg + offset) }
}

fn write_common32(common_cfg: usize, offset: usize, value: u32) {
    unsafe { write32(common_cfg + offset, value) }
}

fn write_common8(common_cfg: usize, offset: usize, value: u8) {
    unsafe { write8(common_cfg + offset, value) }
}

fn read_common8(common_cfg: usize, offset: usize) -> u8 {
    unsafe { read8(common_cfg + offset) }
}

unsafe fn write_common_status(common_cfg: usize, bit: u32) {
    let current = read_common8(common_cfg, COMMON_DEVICE_STATUS) as u32;
    write_common8(common_cfg, COMMON_DEVICE_STATUS, (current | bit) as u8);
}

/// Write 0, spin until it reads 0, ACKNOWLEDGE, DRIVER, echo features,
/// FEATURES_OK (verify sticky), per spec.md §4.7.
fn status_handshake(common_cfg: usize) -> Result<(), GpuError> {
    write_common8(common_cfg, COMMON_DEVICE_STATUS, 0);
    while read_common8(common_cfg, COMMON_DEVICE_STATUS) != 0 {
        core::hint::spin_loop();
    }

    unsafe {
        write_common_status(common_cfg, STATUS_ACKNOWLEDGE);
        write_common_status(common_cfg, STATUS_DRIVER);
    }

    write_common32(common_cfg, COMMON_DEVICE_FEATURE_SELECT, 0);
    let features = read_common32(common_cfg, COMMON_DEVICE_FEATURE);
    write_common32(common_cfg, COMMON_DRIVER_FEATURE_SELECT, 0);
    write_common32(common_cfg, COMMON_DRIVER_FEATURE, features);

    unsafe { write_common_status(common_cfg, STATUS_FEATURES_OK) };
    if read_common8(common_cfg, COMMON_DEVICE_STATUS) as u32 & STATUS_FEATURES_OK == 0 {
        return Err(GpuError::FeaturesNotSticky);
    }
    Ok(())
}

/// Allocate the descriptor/available/used rings from the permanent arena
/// (page-sized, 4 KiB-aligned, never reclaimed — matching spec.md §3's
/// Virtqueue data model) and program queue 0.
fn setup_virtqueue(common_cfg: usize) -> Virtqueue {
    let desc = KERNEL.lock(|k| k.permanent.allocate(core::mem::size_of::<[Descriptor; QUEUE_SIZE]>()));
    let avail = KERNEL.lock(|k| k.permanent.allocate(core::mem::size_of::<AvailRing>()));
    let used = KERNEL.lock(|k| k.permanent.allocate(core::mem::size_of::<UsedRing>()));

    write_common32(common_cfg, COMMON_QUEUE_SELECT, 0);
    write_common32(common_cfg, COMMON_QUEUE_SIZE, QUEUE_SIZE as u32);
    write_common32(common_cfg, COMMON_QUEUE_DESC, desc as u32);
    write_common32(common_cfg, COMMON_QUEUE_DESC + 4, (desc as u64 >> 32) as u32);
    write_common32(common_cfg, COMMON_QUEUE_DRIVER, avail as u32);
    write_common32(common_cfg, COMMON_QUEUE_DRIVER + 4, (avail as u64 >> 32) as u32);
    write_common32(common_cfg, COMMON_QUEUE_DEVICE, used as u32);
    write_common32(common_cfg, COMMON_QUEUE_DEVICE + 4, (used as u64 >> 32) as u32);
    write_common32(common_cfg, COMMON_QUEUE_ENABLE, 1);

    Virtqueue { desc, avail, used }
}

impl VirtioGpu {
    /// Submit one command per spec.md §4.7's five-step protocol: populate
    /// descriptors 0/1, advance the available ring by one, notify, and
    /// spin for the used ring to advance.
    fn submit(&mut self, cmd_len: u32, resp_len: u32) {
        let descs = self.vq.desc as *mut Descriptor;
        unsafe {
            descs.add(0).write(Descriptor {
                addr: self.cmd_buf as u64,
                len: cmd_len,
                flags: F_NEXT,
                next: 1,
            });
            descs.add(1).write(Descriptor {
                addr: self.resp_buf as u64,
                len: resp_len,
                flags: F_WRITE,
                next: 0,
            });
        }

        let avail = self.vq.avail as *mut AvailRing;
        let used = self.vq.used as *const UsedRing;

        let avail_idx = unsafe { (*avail).idx };
        let slot = (avail_idx as usize) % QUEUE_SIZE;
        unsafe {
            (*avail).ring[slot] = 0;
        }
        dsb_ish();
        unsafe {
            (*avail).idx = avail_idx.wrapping_add(1);
        }

        dsb_ish();
        let notify_addr = self.notify_cfg + (self.notify_off_multiplier * 0) as usize;
        unsafe { write32(notify_addr, 0) };

        let target = unsafe { (*used).idx }.wrapping_add(1);
        while unsafe { core::ptr::read_volatile(&(*used).idx) } != target {
            core::hint::spin_loop();
        }
        dsb_ish();
    }

    fn response_type(&self) -> u32 {
        unsafe { core::ptr::read_volatile(self.resp_buf as *const u32) }
    }

    /// GET_DISPLAY_INFO → RESOURCE_CREATE_2D → RESOURCE_ATTACH_BACKING →
    /// SET_SCANOUT, per spec.md §4.7.
    fn init_display(&mut self) -> Result<(), GpuError> {
        self.write_cmd_header(CMD_GET_DISPLAY_INFO);
        self.submit(
            core::mem::size_of::<CtrlHeader>() as u32,
            core::mem::size_of::<DisplayInfoResp>() as u32,
        );
        self.expect_ok_at(core::mem::size_of::<CtrlHeader>() as u32)?;

        let resp = unsafe { &*(self.resp_buf as *const DisplayInfoResp) };
        let mut found: Option<(usize, u32, u32)> = None;
        for (i, mode) in resp.modes.iter().enumerate() {
            if mode.enabled != 0 {
                found = Some((i, mode.rect.width, mode.rect.height));
                break;
            }
        }
        let (scanout_id, width, height) = found.ok_or(GpuError::NoScanout)?;
        self.scanout_id = scanout_id as u32;
        self.width = width;
        self.height = height;

        self.framebuffer = KERNEL.lock(|k| k.permanent.allocate((width * height * 4) as usize));

        let create = ResourceCreate2d {
            header: CtrlHeader {
                cmd_type: CMD_RESOURCE_CREATE_2D,
                flags: 0,
                fence_id: 0,
                ctx_id: 0,
                padding: 0,
            },
            resource_id: RESOURCE_ID,
            format: FORMAT_B8G8R8A8_UNORM,
            width,
            height,
        };
        unsafe { (self.cmd_buf as *mut ResourceCreate2d).write(create) };
        self.submit(
            core::mem::size_of::<ResourceCreate2d>() as u32,
            core::mem::size_of::<CtrlHeader>() as u32,
        );
        self.expect_ok()?;

        let attach = ResourceAttachBacking {
            header: CtrlHeader {
                cmd_type: CMD_RESOURCE_ATTACH_BACKING,
                flags: 0,
                fence_id: 0,
                ctx_id: 0,
                padding: 0,
            },
            resource_id: RESOURCE_ID,
            nr_entries: 1,
            entry: MemEntry {
                addr: self.framebuffer as u64,
                length: width * height * 4,
                padding: 0,
            },
        };
        unsafe { (self.cmd_buf as *mut ResourceAttachBacking).write(attach) };
        self.submit(
            core::mem::size_of::<ResourceAttachBacking>() as u32,
            core::mem::size_of::<CtrlHeader>() as u32,
        );
        self.expect_ok()?;

        let scanout = SetScanout {
            header: CtrlHeader {
                cmd_type: CMD_SET_SCANOUT,
                flags: 0,
                fence_id: 0,
                ctx_id: 0,
                padding: 0,
            },
            rect: Rect { x: 0, y: 0, width, height },
            scanout_id: self.scanout_id,
            resource_id: RESOURCE_ID,
        };
        unsafe { (self.cmd_buf as *mut SetScanout).write(scanout) };
        self.submit(
            core::mem::size_of::<SetScanout>() as u32,
            core::mem::size_of::<CtrlHeader>() as u32,
        );
        self.expect_ok()?;

        Ok(())
    }

    fn write_cmd_header(&self, cmd_type: u32) {
        let header = CtrlHeader {
            cmd_type,
            flags: 0,
            fence_id: 0,
            ctx_id: 0,
            padding: 0,
        };
        unsafe { (self.cmd_buf as *mut CtrlHeader).write(header) };
    }

    fn expect_ok(&self) -> Result<(), GpuError> {
        self.expect_ok_at(0)
    }

    fn expect_ok_at(&self, _unused: u32) -> Result<(), GpuError> {
        let got = self.response_type();
        if got != RESP_OK_NODATA {
            return Err(GpuError::UnexpectedResponse { got });
        }
        Ok(())
    }

    /// Any response type other than OK here is a fatal configuration error,
    /// per spec.md §4.7: a GPU that mis-acks a flush is wedged, not merely
    /// slow, and drawing would keep going on stale state.
    fn flush_region(&mut self, x: u32, y: u32, w: u32, h: u32) {
        let transfer = TransferToHost2d {
            header: CtrlHeader {
                cmd_type: CMD_TRANSFER_TO_HOST_2D,
                flags: 0,
                fence_id: 0,
                ctx_id: 0,
                padding: 0,
            },
            rect: Rect { x, y, width: w, height: h },
            offset: 0,
            resource_id: RESOURCE_ID,
            padding: 0,
        };
        unsafe { (self.cmd_buf as *mut TransferToHost2d).write(transfer) };
        self.submit(
            core::mem::size_of::<TransferToHost2d>() as u32,
            core::mem::size_of::<CtrlHeader>() as u32,
        );
        self.expect_ok()
            .expect("TRANSFER_TO_HOST_2D: unexpected response");

        let flush = ResourceFlush {
            header: CtrlHeader {
                cmd_type: CMD_RESOURCE_FLUSH,
                flags: 0,
                fence_id: 0,
                ctx_id: 0,
                padding: 0,
            },
            rect: Rect { x, y, width: w, height: h },
            resource_id: RESOURCE_ID,
            padding: 0,
        };
        unsafe { (self.cmd_buf as *mut ResourceFlush).write(flush) };
        self.submit(
            core::mem::size_of::<ResourceFlush>() as u32,
            core::mem::size_of::<CtrlHeader>() as u32,
        );
        self.expect_ok().expect("RESOURCE_FLUSH: unexpected response");
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.width + x) as usize;
        unsafe { (self.framebuffer as *mut u32).add(offset).write_volatile(color) };
    }
}

impl Gpu for VirtioGpu {
    fn clear(&mut self, color: u32) {
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                self.set_pixel(x, y, color);
            }
        }
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
        let rows = crate::font::glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..crate::font::GLYPH_WIDTH {
                if bits & (0x80 >> col) != 0 {
                    self.set_pixel(x + col, y + row as u32, color);
                }
            }
        }
    }

    fn draw_string(&mut self, x: u32, y: u32, s: &str, color: u32) {
        for (i, &b) in s.as_bytes().iter().enumerate() {
            self.draw_char(x + i as u32 * crate::font::GLYPH_WIDTH, y, b, color);
        }
    }

    fn flush(&mut self) {
        let (w, h) = (self.width, self.height);
        self.flush_region(0, 0, w, h);
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bit_values_match_wire_protocol() {
        assert_eq!(STATUS_ACKNOWLEDGE, 1);
        assert_eq!(STATUS_DRIVER, 2);
        assert_eq!(STATUS_FEATURES_OK, 8);
        assert_eq!(STATUS_DRIVER_OK, 4);
    }

    #[test]
    fn command_codes_match_wire_protocol() {
        assert_eq!(CMD_GET_DISPLAY_INFO, 0x100);
        assert_eq!(CMD_RESOURCE_CREATE_2D, 0x101);
        assert_eq!(CMD_SET_SCANOUT, 0x102);
        assert_eq!(CMD_RESOURCE_FLUSH, 0x103);
        assert_eq!(CMD_TRANSFER_TO_HOST_2D, 0x104);
        assert_eq!(CMD_RESOURCE_ATTACH_BACKING, 0x106);
        assert_eq!(RESP_OK_NODATA, 0x1100);
    }
}
