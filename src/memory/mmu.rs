/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Stage-1 MMU: four-level translation table tree, `map_2mb`/`map_4kb`, and
//! the MAIR/TCR/TTBR0/SCTLR programming sequence that turns translation on.
//!
//! Grounded on `machine/src/arch/aarch64/memory/mmu.rs`'s
//! `set_up_mair`/`configure_translation_control`/`enable_mmu_and_caching`
//! sequence, with the translation-table bitfield layout adapted from
//! `NeilAllavarpu-Rasperry-Pi-OS`'s `vm.rs` `TranslationDescriptor`.

use crate::arch::{dsb_ish, ic_iallu, isb, tlbi_all};
use crate::memory::allocator::PermanentAllocator;
use crate::println;
use cortex_a::regs::*;

/// Attribute index into MAIR_EL1, per spec.md §4.3: 0 = device-nGnRnE,
/// 1 = normal non-cacheable.
pub const ATTR_DEVICE: u64 = 0;
pub const ATTR_NORMAL_NONCACHEABLE: u64 = 1;

const ENTRIES_PER_TABLE: usize = 512;

/// Access-permission policy selector for `map_4kb`, per spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// AP=01 (EL0/EL1 RW), UXN=0, PXN=0.
    El0,
    /// AP=00 (EL1 RW, EL0 no access), UXN=1, PXN=0.
    El1,
    /// AP=10 (EL0/EL1 RO).
    Shared,
}

impl Permission {
    const fn ap(self) -> u64 {
        match self {
            Permission::El0 => 0b01,
            Permission::El1 => 0b00,
            Permission::Shared => 0b10,
        }
    }

    const fn uxn(self) -> u64 {
        match self {
            Permission::El1 => 1,
            _ => 0,
        }
    }

    const fn pxn(self) -> u64 {
        0
    }
}

const DESC_VALID: u64 = 1 << 0;
const DESC_TABLE_OR_PAGE: u64 = 1 << 1; // bits[1:0] = 11 for tables and L4 pages
const DESC_BLOCK: u64 = 0; // bits[1:0] = 01 for L3 blocks (bit1 clear)
const DESC_AF: u64 = 1 << 10; // access flag, always set: we don't implement access-flag faults
const DESC_SH_INNER: u64 = 0b11 << 8;

const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

fn table_descriptor(table_pa: usize) -> u64 {
    DESC_VALID | DESC_TABLE_OR_PAGE | (table_pa as u64 & ADDR_MASK)
}

fn block_descriptor(pa: u64, attr_index: u64, perm: Permission) -> u64 {
    DESC_VALID
        | DESC_BLOCK
        | DESC_AF
        | DESC_SH_INNER
        | (attr_index << 2)
        | (perm.ap() << 6)
        | (perm.pxn() << 53)
        | (perm.uxn() << 54)
        | (pa & ADDR_MASK)
}

fn page_descriptor(pa: u64, attr_index: u64, perm: Permission) -> u64 {
    DESC_VALID
        | DESC_TABLE_OR_PAGE
        | DESC_AF
        | DESC_SH_INNER
        | (attr_index << 2)
        | (perm.ap() << 6)
        | (perm.pxn() << 53)
        | (perm.uxn() << 54)
        | (pa & ADDR_MASK)
}

fn is_table_descriptor(entry: u64) -> bool {
    entry & 0b11 == 0b11
}

fn is_valid(entry: u64) -> bool {
    entry & DESC_VALID != 0
}

fn table_addr(entry: u64) -> usize {
    (entry & ADDR_MASK) as usize
}

#[repr(C, align(4096))]
struct Table([u64; ENTRIES_PER_TABLE]);

impl Table {
    const fn zeroed() -> Self {
        Self([0u64; ENTRIES_PER_TABLE])
    }
}

fn va_indices(va: usize) -> [usize; 4] {
    [
        (va >> 39) & 0x1FF,
        (va >> 30) & 0x1FF,
        (va >> 21) & 0x1FF,
        (va >> 12) & 0x1FF,
    ]
}

/// The root level-1 translation table: statically allocated, page-aligned,
/// 512 64-bit entries, per spec.md §3.
#[repr(align(4096))]
pub struct RootTable {
    table: Table,
}

impl RootTable {
    pub const fn new() -> Self {
        Self {
            table: Table::zeroed(),
        }
    }

    pub fn base_addr(&self) -> usize {
        &self.table as *const Table as usize
    }

    /// Walk/allocate from `level1` down to the table that owns `idx3`
    /// (spec's "level-3" table, whose entries are 2 MiB blocks), allocating
    /// intermediate tables from `alloc` as needed.
    fn level3_table(&mut self, idx1: usize, idx2: usize, alloc: &PermanentAllocator) -> &mut Table {
        let l2 = Self::descend(&mut self.table, idx1, alloc);
        Self::descend(l2, idx2, alloc)
    }

    /// Walk/allocate down to the table that owns `idx4` (spec's "level-4"
    /// table, whose entries are 4 KiB pages).
    fn level4_table(
        &mut self,
        idx1: usize,
        idx2: usize,
        idx3: usize,
        alloc: &PermanentAllocator,
    ) -> &mut Table {
        let l2 = Self::descend(&mut self.table, idx1, alloc);
        let l3 = Self::descend(l2, idx2, alloc);
        Self::descend(l3, idx3, alloc)
    }

    fn descend<'t>(table: &'t mut Table, idx: usize, alloc: &PermanentAllocator) -> &'t mut Table {
        let entry = table.0[idx];
        if is_valid(entry) {
            let addr = table_addr(entry);
            return unsafe { &mut *(addr as *mut Table) };
        }
        let new_table_pa = alloc.allocate(core::mem::size_of::<Table>());
        unsafe {
            core::ptr::write_bytes(new_table_pa as *mut u8, 0, core::mem::size_of::<Table>());
        }
        table.0[idx] = table_descriptor(new_table_pa);
        unsafe { &mut *(new_table_pa as *mut Table) }
    }

    /// Install a level-3 (2 MiB) block mapping. Always uses kernel (EL1)
    /// permissions, matching spec.md §4.3's initialization use of 2 MiB
    /// blocks for kernel code/data only.
    pub fn map_2mb(&mut self, va: usize, pa: usize, attr_index: u64, alloc: &PermanentAllocator) {
        let [idx1, idx2, idx3, _idx4] = va_indices(va);
        let table = self.level3_table(idx1, idx2, alloc);
        if is_valid(table.0[idx3]) {
            return; // idempotent re-map: identical params leave state unchanged
        }
        table.0[idx3] = block_descriptor(pa as u64, attr_index, Permission::El1);
    }

    /// Install a level-4 (4 KiB) page mapping with the access-permission
    /// policy selected by `perm`. Rejects (with a warning, original kept)
    /// an attempt to re-map an already-present level-4 entry at the same
    /// granularity with different parameters, per spec.md §4.3/§7.
    pub fn map_4kb(
        &mut self,
        va: usize,
        pa: usize,
        attr_index: u64,
        perm: Permission,
        alloc: &PermanentAllocator,
    ) {
        let [idx1, idx2, idx3, idx4] = va_indices(va);

        // Re-mapping a present level-3 (2 MiB block) entry as a 4 KiB page
        // is rejected outright: the intermediate table doesn't even exist
        // as a page table in that case.
        {
            let l3 = self.level3_table(idx1, idx2, alloc);
            if is_valid(l3.0[idx3]) && !is_table_descriptor(l3.0[idx3]) {
                println!(
                    "[!] mmu: refusing to remap 2 MiB block at va={:#x} as a 4 KiB page",
                    va
                );
                return;
            }
        }

        let table = self.level4_table(idx1, idx2, idx3, alloc);
        let new_entry = page_descriptor(pa as u64, attr_index, perm);
        if table.0[idx4] == new_entry {
            return; // identical re-map: no-op
        }
        if is_valid(table.0[idx4]) {
            println!(
                "[!] mmu: conflicting 4 KiB mapping at va={:#x}, keeping existing entry",
                va
            );
            return;
        }
        table.0[idx4] = new_entry;
    }

    /// Simulated table walk used by the test-only invariant checks in
    /// spec.md §8: returns the raw level-4 entry for `va`, if present.
    #[cfg(test)]
    fn walk_level4(&mut self, va: usize, alloc: &PermanentAllocator) -> Option<u64> {
        let [idx1, idx2, idx3, idx4] = va_indices(va);
        let table = self.level4_table(idx1, idx2, idx3, alloc);
        let entry = table.0[idx4];
        is_valid(entry).then_some(entry)
    }

    #[cfg(test)]
    fn walk_level3(&mut self, va: usize, alloc: &PermanentAllocator) -> Option<u64> {
        let [idx1, idx2, idx3, _] = va_indices(va);
        let table = self.level3_table(idx1, idx2, alloc);
        let entry = table.0[idx3];
        is_valid(entry).then_some(entry)
    }
}

/// Program MAIR_EL1 with the two attribute indices spec.md §4.3 requires.
fn set_up_mair() {
    MAIR_EL1.write(
        MAIR_EL1::Attr0_Normal_Outer::NonCacheable
            + MAIR_EL1::Attr0_Normal_Inner::NonCacheable
            + MAIR_EL1::Attr1_Device::nonGathering_nonReordering_noEarlyWriteAck,
    );
}

/// Program TCR_EL1: T0SZ/T1SZ = 16 (48-bit VA), inner-shareable, 4 KiB
/// granule for both halves, per spec.md §4.3.
fn configure_translation_control() {
    let t0sz: u64 = 16;
    let t1sz: u64 = 16;

    TCR_EL1.write(
        TCR_EL1::TBI0::Used
            + TCR_EL1::IPS.val(0b001) // 40-bit intermediate PA, plenty for "virt"
            + TCR_EL1::TG0::KiB_4
            + TCR_EL1::SH0::Inner
            + TCR_EL1::ORGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::IRGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::EPD0::EnableTTBR0Walks
            + TCR_EL1::T0SZ.val(t0sz)
            + TCR_EL1::TG1::KiB_4
            + TCR_EL1::SH1::Inner
            + TCR_EL1::ORGN1::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::IRGN1::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::EPD1::DisableTTBR1Walks
            + TCR_EL1::T1SZ.val(t1sz),
    );
}

/// Program TTBR0_EL1 and enable stage-1 translation (SCTLR_EL1.M), with the
/// barrier sequence spec.md §4.3 requires around the M-bit write.
///
/// # Safety
///
/// The translation tables reachable from `root` must already map the
/// kernel's own code/data and the memory holding this function, or the
/// first instruction fetch after enabling the M bit will fault.
pub unsafe fn enable(root: &RootTable) {
    set_up_mair();
    configure_translation_control();

    TTBR0_EL1.set_baddr(root.base_addr() as u64);

    dsb_ish();
    isb();

    SCTLR_EL1.modify(SCTLR_EL1::M::Enable);

    isb();
}

/// The full page-table-write barrier sequence spec.md §5 mandates:
/// DSB-ISH, TLB invalidate-all (EL1, inner-shareable), DSB-ISH, ISB, plus an
/// I-cache invalidate when the write touched instruction pages.
pub fn post_mapping_barriers(instruction_pages: bool) {
    tlbi_all();
    if instruction_pages {
        ic_iallu();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc() -> PermanentAllocator {
        PermanentAllocator::new(0x9000_0000, 0x9100_0000)
    }

    #[test]
    fn map_2mb_yields_block_entry_with_bits_01() {
        let a = alloc();
        let mut root = RootTable::new();
        let va = 0x4000_0000usize;
        root.map_2mb(va, va, ATTR_NORMAL_NONCACHEABLE, &a);
        let entry = root.walk_level3(va, &a).expect("mapping must be present");
        assert_eq!(entry & 0b11, 0b01);
    }

    #[test]
    fn map_4kb_output_address_and_permissions_match_policy() {
        let a = alloc();
        let mut root = RootTable::new();
        let va = 0x5000_1000usize;
        let pa = 0x6000_2000usize;
        root.map_4kb(va, pa, ATTR_DEVICE, Permission::El0, &a);
        let entry = root.walk_level4(va, &a).expect("mapping must be present");
        assert_eq!(entry & ADDR_MASK, (pa as u64) & !0xFFF);
        assert_eq!((entry >> 6) & 0b11, Permission::El0.ap());
        assert_eq!((entry >> 54) & 1, Permission::El0.uxn());
        assert_eq!((entry >> 53) & 1, Permission::El0.pxn());
    }

    #[test]
    fn remapping_identical_4kb_mapping_is_a_noop() {
        let a = alloc();
        let mut root = RootTable::new();
        let va = 0x5000_3000usize;
        let pa = 0x6000_4000usize;
        root.map_4kb(va, pa, ATTR_DEVICE, Permission::El1, &a);
        let before = root.walk_level4(va, &a).unwrap();
        root.map_4kb(va, pa, ATTR_DEVICE, Permission::El1, &a);
        let after = root.walk_level4(va, &a).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn mapping_4kb_over_existing_2mb_block_is_rejected() {
        let a = alloc();
        let mut root = RootTable::new();
        let base = 0x4000_0000usize;
        root.map_2mb(base, base, ATTR_NORMAL_NONCACHEABLE, &a);
        root.map_4kb(base + 0x1000, base + 0x1000, ATTR_NORMAL_NONCACHEABLE, Permission::El1, &a);
        let block_entry = root.walk_level3(base, &a).unwrap();
        assert_eq!(block_entry & 0b11, 0b01, "the original block mapping must be kept unchanged");
    }
}
