/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Firmware-configuration interface: an external collaborator per spec.md
//! §1, implemented here to its contract in spec.md §6 — selector register,
//! data port, DMA control register; directory entry 0x19 yields a file
//! count followed by fixed-size records.

use crate::mmio::{read32, write32};

/// virt platform fw_cfg MMIO base.
const FW_CFG_BASE: usize = 0x0902_0000;
const FW_CFG_SELECTOR: usize = FW_CFG_BASE + 0x08;
const FW_CFG_DATA: usize = FW_CFG_BASE + 0x00;
const FW_CFG_DMA: usize = FW_CFG_BASE + 0x10;

const FW_CFG_FILE_DIR: u16 = 0x19;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FileRecord {
    pub size: u32,
    pub selector: u16,
    pub reserved: u16,
    pub name: [u8; 56],
}

const MAX_FILES: usize = 64;

/// Submit a `{control, length, address}` big-endian DMA request at the
/// known offset, per spec.md §6.
///
/// # Safety
///
/// `address` must be a valid, writable physical address for `length`
/// bytes, mapped as normal memory.
unsafe fn dma_request(control: u32, length: u32, address: u64) {
    #[repr(C)]
    struct DmaAccess {
        control: u32,
        length: u32,
        address: u64,
    }
    let access = DmaAccess {
        control: control.to_be(),
        length: length.to_be(),
        address: address.to_be(),
    };
    let access_addr = &access as *const DmaAccess as u64;
    write32(FW_CFG_DMA, (access_addr >> 32) as u32);
    write32(FW_CFG_DMA + 4, access_addr as u32);
    crate::arch::dsb_ish();
}

fn select(selector: u16) {
    unsafe { write32(FW_CFG_SELECTOR, selector as u32) };
}

fn read_bytes(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = unsafe { read32(FW_CFG_DATA) as u8 };
    }
}

/// Read the file directory (selector 0x19: a big-endian `u32` count
/// followed by that many [`FileRecord`]s) and return the record for `name`,
/// if present.
pub fn lookup_file(name: &str) -> Option<FileRecord> {
    select(FW_CFG_FILE_DIR);

    let mut count_be = [0u8; 4];
    read_bytes(&mut count_be);
    let count = u32::from_be_bytes(count_be) as usize;

    for _ in 0..count.min(MAX_FILES) {
        let mut raw = [0u8; core::mem::size_of::<FileRecord>()];
        read_bytes(&mut raw);

        let size = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let selector = u16::from_be_bytes([raw[4], raw[5]]);
        let reserved = u16::from_be_bytes([raw[6], raw[7]]);
        let mut record_name = [0u8; 56];
        record_name.copy_from_slice(&raw[8..64]);

        let nul = record_name.iter().position(|&b| b == 0).unwrap_or(56);
        if &record_name[..nul] == name.as_bytes() {
            return Some(FileRecord {
                size,
                selector,
                reserved,
                name: record_name,
            });
        }
    }
    None
}

/// The one fw-cfg file the kernel consumes, per spec.md §6.
pub const RAMFB_FILE: &str = "etc/ramfb";
