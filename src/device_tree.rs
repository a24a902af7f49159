/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Device-tree parsing: an external collaborator per spec.md §1, given a
//! real implementation here because the memory-map discovery the kernel
//! needs at boot (spec.md §6's "magic 0xD00DFEED" blob) has to come from
//! somewhere.
//!
//! Grounded on `machine/src/device_tree.rs`'s `DevTreeIndex`-based shape:
//! build an index over a scratch buffer sized by `DevTreeIndex::get_layout`,
//! then navigate by path. Extended with a linear child scan for
//! `virtio_mmio@...` nodes, which the teacher's path-only navigation
//! doesn't support.

use crate::kernel::KERNEL;
use crate::println;
use fdt_rs::base::DevTree;
use fdt_rs::error::DevTreeError;
use fdt_rs::index::{DevTreeIndex, DevTreeIndexNode};
use fdt_rs::prelude::*;

/// Big-endian magic at offset 0 of a flattened device tree blob, per
/// spec.md §6.
const FDT_MAGIC: u32 = 0xD00D_FEED;

pub struct DeviceTree<'a> {
    index: DevTreeIndex<'a, 'a>,
}

/// A discovered `(base, size)` region, as found in a `reg` property with
/// `#address-cells = <2>; #size-cells = <2>`, the layout QEMU's `virt`
/// machine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub size: u64,
}

impl<'a> DeviceTree<'a> {
    /// Validate the FDT header magic, build an index into a scratch buffer
    /// allocated from the permanent arena (sized by the tree itself), and
    /// return the parsed tree.
    ///
    /// # Safety
    ///
    /// `dtb_ptr` must point to a valid flattened device tree blob, as
    /// handed off by firmware per spec.md §6.
    pub unsafe fn parse(dtb_ptr: *const u8) -> Result<Self, DevTreeError> {
        let magic = u32::from_be_bytes([*dtb_ptr, *dtb_ptr.add(1), *dtb_ptr.add(2), *dtb_ptr.add(3)]);
        if magic != FDT_MAGIC {
            return Err(DevTreeError::ParseError);
        }

        let tree = DevTree::new(core::slice::from_raw_parts(dtb_ptr, DevTree::MIN_HEADER_SIZE))?;
        let tree = DevTree::new(core::slice::from_raw_parts(dtb_ptr, tree.totalsize()))?;

        let layout = DevTreeIndex::get_layout(&tree)?;
        let buf_addr = KERNEL.lock(|k| k.permanent.allocate(layout.size() + layout.align()));
        let buf = core::slice::from_raw_parts_mut(buf_addr as *mut u8, layout.size() + layout.align());

        let index = DevTreeIndex::new(tree, buf)?;
        Ok(Self { index })
    }

    fn find_child_by_prefix(&'a self, prefix: &str) -> Option<DevTreeIndexNode<'a, 'a, 'a>> {
        self.index
            .root()
            .children()
            .find(|node| node.name().map(|n| n.starts_with(prefix)).unwrap_or(false))
    }

    fn reg_pairs(node: &DevTreeIndexNode, address_cells: u32, size_cells: u32) -> Option<(u64, u64)> {
        let prop = node.props().find(|p| p.name().unwrap_or("") == "reg")?;
        match (address_cells, size_cells) {
            (2, 2) => Some((prop.u64(0).ok()?, prop.u64(1).ok()?)),
            (2, 1) => Some((prop.u64(0).ok()?, prop.u32(2).ok()? as u64)),
            (1, 1) => Some((prop.u32(0).ok()? as u64, prop.u32(1).ok()? as u64)),
            _ => None,
        }
    }

    /// RAM extent from the `/memory` node's `reg` property, per spec.md §6.
    pub fn memory_region(&'a self) -> Option<Region> {
        let node = self.find_child_by_prefix("memory")?;
        let (base, size) = Self::reg_pairs(&node, 2, 2)?;
        Some(Region { base, size })
    }

    /// `(reg region, interrupt number)` of the first `virtio_mmio` node, per
    /// spec.md §6.
    pub fn virtio_mmio(&'a self) -> Option<(Region, u32)> {
        let node = self.find_child_by_prefix("virtio_mmio")?;
        let (base, size) = Self::reg_pairs(&node, 2, 2)?;
        let irq = node
            .props()
            .find(|p| p.name().unwrap_or("") == "interrupts")
            .and_then(|p| p.u32(1).ok())?;
        Some((Region { base, size }, irq))
    }
}

/// Log the discovered regions; used by the boot path to cross-check the
/// linker-provided heap layout against what firmware actually reports.
pub fn log_discovered(tree: &DeviceTree) {
    if let Some(region) = tree.memory_region() {
        println!("[i] device-tree: memory {:#x}..{:#x}", region.base, region.base + region.size);
    }
    if let Some((region, irq)) = tree.virtio_mmio() {
        println!("[i] device-tree: virtio_mmio at {:#x} irq {}", region.base, irq);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn fdt_magic_matches_spec_constant() {
        assert_eq!(super::FDT_MAGIC, 0xD00D_FEED);
    }
}
