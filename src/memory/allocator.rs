/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The two-tier bump allocator: a *temporary* arena with a per-size LIFO
//! free list, and a *permanent* arena that never reclaims.
//!
//! Grounded on `nucleus/src/mm/bump_allocator.rs`'s named, const-constructed
//! bump-pointer shape; extended with the free list spec.md's temporary
//! arena requires, which the teacher's allocator does not have.

use crate::memory::{align_up, PAGE_SIZE};
use crate::sync::NullLock;
use crate::{println, sync::IrqGuard};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum AllocatorError {
    #[snafu(display(
        "permanent allocator overflow: next={:#x} size={:#x} limit={:#x}",
        next,
        size,
        limit
    ))]
    PermanentOverflow { next: usize, size: usize, limit: usize },

    #[snafu(display(
        "temporary allocator overflow: next={:#x} size={:#x} limit={:#x}",
        next,
        size,
        limit
    ))]
    TemporaryOverflow { next: usize, size: usize, limit: usize },
}

/// A monotone bump pointer between `[next, limit)`.
struct Bump {
    next: usize,
    limit: usize,
}

impl Bump {
    const fn new(start: usize, limit: usize) -> Self {
        Self { next: start, limit }
    }

    fn bump(&mut self, size: usize) -> Result<usize, (usize, usize)> {
        let size = align_up(size.max(1), PAGE_SIZE).max(PAGE_SIZE);
        let start = align_up(self.next, PAGE_SIZE);
        let end = start + size;
        if end > self.limit {
            return Err((self.next, size));
        }
        self.next = end;
        Ok(start)
    }
}

/// A node written at the head of a freed temporary block, per spec.md §3's
/// "Free block (temporary allocator)" data model.
#[repr(C)]
struct FreeBlock {
    next: Option<core::ptr::NonNull<FreeBlock>>,
    size: usize,
}

struct TemporaryState {
    bump: Bump,
    free_list: Option<core::ptr::NonNull<FreeBlock>>,
}

unsafe impl Send for TemporaryState {}

pub struct TemporaryAllocator {
    inner: NullLock<TemporaryState>,
}

impl TemporaryAllocator {
    pub const fn new(start: usize, limit: usize) -> Self {
        Self {
            inner: NullLock::new(TemporaryState {
                bump: Bump::new(start, limit),
                free_list: None,
            }),
        }
    }

    /// Returns a 4 KiB-aligned address for a block of at least `size`
    /// bytes, rounded up. Walks the free list first; only advances the
    /// bump pointer when no block is large enough. Fatal on exhaustion.
    pub fn allocate(&self, size: usize) -> usize {
        let _guard = IrqGuard::new();
        self.inner.lock(|state| {
            let rounded = align_up(size.max(1), PAGE_SIZE).max(PAGE_SIZE);

            let mut prev: Option<core::ptr::NonNull<FreeBlock>> = None;
            let mut cursor = state.free_list;
            while let Some(node) = cursor {
                let block = unsafe { node.as_ref() };
                if block.size >= rounded {
                    let next = block.next;
                    match prev {
                        Some(mut p) => unsafe { p.as_mut().next = next },
                        None => state.free_list = next,
                    }
                    return node.as_ptr() as usize;
                }
                prev = cursor;
                cursor = block.next;
            }

            match state.bump.bump(rounded) {
                Ok(addr) => addr,
                Err((next, size)) => {
                    println!(
                        "[!] temporary allocator overflow: next={:#x} size={:#x} limit={:#x}",
                        next, size, state.bump.limit
                    );
                    panic!("temporary allocator overflow");
                }
            }
        })
    }

    /// Returns a block to the free list after writing `{next, size}` at its
    /// head.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::allocate`] on this same
    /// allocator with the same `size`, and must not still be in use.
    pub unsafe fn free(&self, ptr: usize, size: usize) {
        let _guard = IrqGuard::new();
        self.inner.lock(|state| {
            let rounded = align_up(size.max(1), PAGE_SIZE).max(PAGE_SIZE);
            let node = ptr as *mut FreeBlock;
            node.write(FreeBlock {
                next: state.free_list,
                size: rounded,
            });
            state.free_list = core::ptr::NonNull::new(node);
        });
    }
}

pub struct PermanentAllocator {
    inner: NullLock<Bump>,
}

impl PermanentAllocator {
    pub const fn new(start: usize, limit: usize) -> Self {
        Self {
            inner: NullLock::new(Bump::new(start, limit)),
        }
    }

    /// Returns a 4 KiB-aligned address for a block of at least `size`
    /// bytes, rounded up. Fatal ("permanent allocator overflow") on
    /// exhaustion.
    pub fn allocate(&self, size: usize) -> usize {
        let _guard = IrqGuard::new();
        self.inner.lock(|bump| match bump.bump(size) {
            Ok(addr) => addr,
            Err((next, size)) => {
                println!(
                    "[!] permanent allocator overflow: next={:#x} size={:#x} limit={:#x}",
                    next, size, bump.limit
                );
                panic!("permanent allocator overflow");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_allocate_is_page_aligned_and_bounded() {
        let a = PermanentAllocator::new(0x1000, 0x4000);
        let p1 = a.allocate(1);
        assert_eq!(p1 % PAGE_SIZE, 0);
        assert_eq!(p1, 0x1000);
        let p2 = a.allocate(PAGE_SIZE);
        assert_eq!(p2, 0x2000);
    }

    #[test]
    fn permanent_allocate_zero_size_advances_only_to_alignment() {
        let a = PermanentAllocator::new(0x1000, 0x2000);
        let p = a.allocate(0);
        assert_eq!(p, 0x1000);
        // a second zero-size allocation must still fit: the pointer only
        // advanced by one page, not zero.
        let p2 = a.allocate(0);
        assert_eq!(p2, 0x1000 + PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "permanent allocator overflow")]
    fn permanent_allocate_panics_on_overflow() {
        let a = PermanentAllocator::new(0x1000, 0x1000);
        a.allocate(1);
    }

    #[test]
    fn temporary_allocate_reuses_freed_block_before_bumping() {
        let a = TemporaryAllocator::new(0x10000, 0x20000);
        let p1 = a.allocate(PAGE_SIZE);
        let p2 = a.allocate(PAGE_SIZE);
        assert_ne!(p1, p2);
        unsafe { a.free(p1, PAGE_SIZE) };
        let p3 = a.allocate(PAGE_SIZE);
        assert_eq!(p3, p1, "freed block must be reused before the bump pointer advances");
    }

    #[test]
    fn temporary_free_list_is_lifo() {
        let a = TemporaryAllocator::new(0x10000, 0x40000);
        let p1 = a.allocate(PAGE_SIZE);
        let p2 = a.allocate(PAGE_SIZE);
        unsafe {
            a.free(p1, PAGE_SIZE);
            a.free(p2, PAGE_SIZE);
        }
        let first_reused = a.allocate(PAGE_SIZE);
        assert_eq!(first_reused, p2);
        let second_reused = a.allocate(PAGE_SIZE);
        assert_eq!(second_reused, p1);
    }
}
