//! # CPU Control
//!
//! Low-level CPU control functions for 32-bit x86.

use super::registers::EFlags;
use core::arch::asm;

/// Disable interrupts (CLI)
///
/// # Safety
/// Disabling interrupts can cause the system to hang if not re-enabled.
#[inline]
pub unsafe fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enable interrupts (STI)
///
/// # Safety
/// Interrupts should only be enabled when the system is ready to handle them.
#[inline]
pub unsafe fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Check if interrupts are enabled
#[inline]
pub fn are_interrupts_enabled() -> bool {
    let flags: u32;
    // SAFETY: reads EFLAGS through the stack.
    unsafe {
        asm!("pushfd; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    EFlags::from_bits_truncate(flags).contains(EFlags::INTERRUPT)
}

/// Halt the CPU until the next interrupt
#[inline]
pub fn halt() {
    // SAFETY: resumes on the next interrupt.
    unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) }
}

/// Read CR3 (active page-directory root)
#[inline]
pub fn read_cr3() -> u32 {
    let value: u32;
    // SAFETY: reading CR3 has no side effects.
    unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) }
    value
}

/// Write CR3
///
/// # Safety
/// `value` must be the root of a page directory that maps the running kernel.
#[inline]
pub unsafe fn write_cr3(value: u32) {
    unsafe { asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)) }
}
