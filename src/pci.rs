/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! PCI ECAM configuration-space access and capability-list walking, per
//! spec.md §6/§4.7.
//!
//! Grounded in protocol shape on the pack's `other_examples/` VirtIO-GPU
//! PCI drivers (ECAM addressing, capability-list traversal, BAR
//! size-probing), adapted to spec.md's exact field offsets and discovery
//! rule.

use crate::mmio::{read32, write32};
use snafu::Snafu;

/// virt platform's `gpex` PCIe host ECAM base.
pub const ECAM_BASE: usize = 0x3F00_0000;

pub const VIRTIO_GPU_VENDOR: u16 = 0x1AF4;
pub const VIRTIO_GPU_DEVICE: u16 = 0x1050;

const MAX_BUS: u32 = 1; // "virt" exposes the VirtIO devices on bus 0 in practice
const MAX_SLOT: u32 = 32;
const MAX_FUNC: u32 = 8;

const OFFSET_VENDOR_DEVICE: usize = 0x00;
const OFFSET_COMMAND: usize = 0x04;
const OFFSET_BAR0: usize = 0x10;
const OFFSET_CAPABILITIES_PTR: usize = 0x34;

const COMMAND_MEMORY_SPACE: u32 = 1 << 1;

#[derive(Debug, Snafu)]
pub enum PciError {
    #[snafu(display("no device matching vendor {:#06x} device {:#06x} found", vendor, device))]
    NotFound { vendor: u16, device: u16 },
}

/// Address of function `(bus, slot, func)`'s configuration space within the
/// ECAM window.
fn function_base(bus: u32, slot: u32, func: u32) -> usize {
    ECAM_BASE | ((bus as usize) << 20) | ((slot as usize) << 15) | ((func as usize) << 12)
}

fn config_read32(base: usize, offset: usize) -> u32 {
    unsafe { read32(base + offset) }
}

fn config_write32(base: usize, offset: usize, value: u32) {
    unsafe { write32(base + offset, value) }
}

/// A PCI device function located via ECAM scanning.
#[derive(Debug, Clone, Copy)]
pub struct PciDevice {
    pub config_base: usize,
}

/// Vendor-specific capability type 9, per the VirtIO-over-PCI spec; the
/// `cfg_type` byte distinguishes which configuration region it describes.
const CAP_VENDOR_SPECIFIC: u8 = 0x09;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtioCfgType {
    Common = 1,
    Notify = 2,
    Isr = 3,
    Device = 4,
    Pci = 5,
}

impl VirtioCfgType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Common),
            2 => Some(Self::Notify),
            3 => Some(Self::Isr),
            4 => Some(Self::Device),
            5 => Some(Self::Pci),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VirtioCapability {
    pub cfg_type: VirtioCfgType,
    pub bar: u8,
    pub offset: u32,
    pub length: u32,
    /// Only meaningful for `Notify`: the multiplier applied to the queue
    /// index to get the notify-register byte offset.
    pub notify_off_multiplier: u32,
    pub cap_offset: u8,
}

/// Scan PCI configuration space for `(vendor, device)`, per spec.md §4.7's
/// Discovery contract.
pub fn find_device(vendor: u16, device: u16) -> Result<PciDevice, PciError> {
    for bus in 0..MAX_BUS {
        for slot in 0..MAX_SLOT {
            for func in 0..MAX_FUNC {
                let base = function_base(bus, slot, func);
                let id = config_read32(base, OFFSET_VENDOR_DEVICE);
                if id == 0xFFFF_FFFF {
                    continue; // no function present
                }
                let found_vendor = (id & 0xFFFF) as u16;
                let found_device = (id >> 16) as u16;
                if found_vendor == vendor && found_device == device {
                    return Ok(PciDevice { config_base: base });
                }
            }
        }
    }
    Err(PciError::NotFound { vendor, device })
}

impl PciDevice {
    /// Walk the capabilities linked list starting at the capabilities
    /// pointer (offset 0x34), per spec.md §4.7, collecting every
    /// vendor-specific (type 9) entry.
    pub fn virtio_capabilities(&self) -> [Option<VirtioCapability>; 8] {
        let mut out: [Option<VirtioCapability>; 8] = [None; 8];
        let mut idx = 0usize;

        let mut cap_ptr = config_read32(self.config_base, OFFSET_CAPABILITIES_PTR) & 0xFF;
        let mut guard = 0;
        while cap_ptr != 0 && idx < out.len() && guard < 64 {
            guard += 1;
            let cap_base = cap_ptr as usize;
            let header = config_read32(self.config_base, cap_base);
            let cap_id = (header & 0xFF) as u8;
            let next_ptr = (header >> 8) & 0xFF;

            if cap_id == CAP_VENDOR_SPECIFIC {
                let w1 = config_read32(self.config_base, cap_base + 4);
                let cfg_type_raw = (w1 & 0xFF) as u8;
                let bar = ((w1 >> 8) & 0xFF) as u8;
                let cap_struct_offset = config_read32(self.config_base, cap_base + 8);
                let cap_struct_length = config_read32(self.config_base, cap_base + 12);
                let notify_off_multiplier = if cfg_type_raw == VirtioCfgType::Notify as u8 {
                    config_read32(self.config_base, cap_base + 16)
                } else {
                    0
                };

                if let Some(cfg_type) = VirtioCfgType::from_u8(cfg_type_raw) {
                    out[idx] = Some(VirtioCapability {
                        cfg_type,
                        bar,
                        offset: cap_struct_offset,
                        length: cap_struct_length,
                        notify_off_multiplier,
                        cap_offset: cap_ptr as u8,
                    });
                    idx += 1;
                }
            }

            cap_ptr = next_ptr;
        }

        out
    }

    /// Size-probe BAR `n`: write all-ones, read back, compute
    /// `size = ~(value & ~0xF) + 1`, per spec.md §4.7.
    pub fn bar_size(&self, n: u8) -> u32 {
        let offset = OFFSET_BAR0 + (n as usize) * 4;
        let original = config_read32(self.config_base, offset);
        config_write32(self.config_base, offset, 0xFFFF_FFFF);
        let probed = config_read32(self.config_base, offset);
        config_write32(self.config_base, offset, original);
        let masked = probed & !0xF;
        (!masked).wrapping_add(1)
    }

    /// Assign `base` to BAR `n` and re-enable memory-space decoding (command
    /// register bit 1), per spec.md §4.7.
    pub fn assign_bar(&self, n: u8, base: u32) {
        let offset = OFFSET_BAR0 + (n as usize) * 4;
        config_write32(self.config_base, offset, base);
        let command = config_read32(self.config_base, OFFSET_COMMAND);
        config_write32(self.config_base, OFFSET_COMMAND, command | COMMAND_MEMORY_SPACE);
    }

    pub fn bar_value(&self, n: u8) -> u32 {
        config_read32(self.config_base, OFFSET_BAR0 + (n as usize) * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtio_cfg_type_round_trips_known_values() {
        assert_eq!(VirtioCfgType::from_u8(1), Some(VirtioCfgType::Common));
        assert_eq!(VirtioCfgType::from_u8(2), Some(VirtioCfgType::Notify));
        assert_eq!(VirtioCfgType::from_u8(5), Some(VirtioCfgType::Pci));
        assert_eq!(VirtioCfgType::from_u8(0), None);
    }

    #[test]
    fn function_base_encodes_bus_slot_func() {
        let base = function_base(0, 3, 0);
        assert_eq!(base, ECAM_BASE | (3 << 15));
    }
}
