/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Synchronous EL0 (SVC) dispatch, per spec.md §4.6.
//!
//! Grounded on `NeilAllavarpu-Rasperry-Pi-OS`'s `exception/svc/mod.rs`
//! (`CallCode`/`SvcIS` shape, the PRINT-writes-a-slice pattern), adapted to
//! spec.md's exact signature: x0 = format-string pointer, x1 = pointer to
//! an argument array, x2 = argument count, x8 = syscall number.

use crate::exception::ExceptionContext;
use crate::{println, sched};

/// The one defined service, per spec.md §4.6.
const SYSCALL_PRINT: u64 = 3;

/// Each PRINT argument is passed as a `u64` slot; the format string itself
/// decides how each is interpreted (mirroring a `printf`-style varargs
/// call, simplified to a fixed-width slot per argument).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PrintArg(pub u64);

/// Resolution of spec.md §9's open question on pointer validation: a user
/// pointer is accepted only if it falls within the calling task's
/// EL0-mapped code or data range, as recorded by the spawn routine. Craybond
/// tracks that range per-task rather than walking the page tables on every
/// syscall; see DESIGN.md.
pub fn validate_user_range(ptr: u64, len: u64, el0_base: u64, el0_limit: u64) -> bool {
    let end = match ptr.checked_add(len) {
        Some(e) => e,
        None => return false,
    };
    ptr >= el0_base && end <= el0_limit
}

/// Decode and dispatch a synchronous EL0 exception. Any syscall number
/// other than [`SYSCALL_PRINT`] is fatal, per spec.md §4.6/§7.
pub fn handle(e: &mut ExceptionContext) {
    let syscall_number = e.gpr[8];
    let x0 = e.gpr[0];
    let x1 = e.gpr[1];
    let x2 = e.gpr[2];

    match syscall_number {
        SYSCALL_PRINT => {
            let (el0_base, el0_limit) = sched::current_el0_range();
            print_syscall(x0, x1, x2, el0_base, el0_limit)
        }
        other => {
            println!("[!] unknown syscall number {}", other);
            panic!("unknown syscall number {}", other);
        }
    }
}

fn print_syscall(format_ptr: u64, args_ptr: u64, args_count: u64, el0_base: u64, el0_limit: u64) {
    let format = validated_c_str(format_ptr, el0_base, el0_limit);

    let args_bytes = args_count
        .checked_mul(core::mem::size_of::<PrintArg>() as u64)
        .filter(|&len| validate_user_range(args_ptr, len, el0_base, el0_limit));
    if args_bytes.is_none() {
        panic!("PRINT syscall argument array out of range");
    }
    let args = unsafe {
        core::slice::from_raw_parts(args_ptr as *const PrintArg, args_count as usize)
    };

    print_formatted(format, args, el0_base, el0_limit);
}

/// Read a NUL-terminated string out of user memory, rejecting a pointer
/// outside `[el0_base, el0_limit)` and bounding the scan by the range
/// instead of walking off the end looking for a terminator.
fn validated_c_str(ptr: u64, el0_base: u64, el0_limit: u64) -> &'static str {
    if ptr < el0_base || ptr >= el0_limit {
        panic!("syscall string pointer out of range");
    }
    let max_len = (el0_limit - ptr) as usize;
    let base = ptr as *const u8;
    let mut len = 0usize;
    while len < max_len && unsafe { *base.add(len) } != 0 {
        len += 1;
    }
    if len == max_len {
        panic!("syscall string pointer missing NUL terminator within range");
    }
    unsafe { core::str::from_utf8_unchecked(core::slice::from_raw_parts(base, len)) }
}

/// Minimal `%i`/`%s` formatter over the PRINT argument array, sufficient
/// for spec.md §8 scenario 2's `"P%i"` boot-screen counter print. `%s`
/// arguments are themselves user pointers, so they go through
/// [`validated_c_str`] too rather than being dereferenced blind.
fn print_formatted(format: &str, args: &[PrintArg], el0_base: u64, el0_limit: u64) {
    let mut arg_idx = 0usize;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('i') | Some('d') => {
                    if let Some(arg) = args.get(arg_idx) {
                        print!("{}", arg.0 as i64);
                        arg_idx += 1;
                    }
                }
                Some('s') => {
                    if let Some(arg) = args.get(arg_idx) {
                        let s = validated_c_str(arg.0, el0_base, el0_limit);
                        print!("{}", s);
                        arg_idx += 1;
                    }
                }
                Some('%') => print!("%"),
                Some(other) => print!("%{}", other),
                None => print!("%"),
            }
        } else {
            print!("{}", c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_user_range_accepts_fully_contained_range() {
        assert!(validate_user_range(0x2000, 0x100, 0x1000, 0x3000));
    }

    #[test]
    fn validate_user_range_rejects_range_crossing_limit() {
        assert!(!validate_user_range(0x2F00, 0x200, 0x1000, 0x3000));
    }

    #[test]
    fn validate_user_range_rejects_range_below_base() {
        assert!(!validate_user_range(0x500, 0x10, 0x1000, 0x3000));
    }

    #[test]
    fn validate_user_range_rejects_overflowing_length() {
        assert!(!validate_user_range(u64::MAX - 4, 16, 0, u64::MAX));
    }
}
