//! # CPU Control
//!
//! Low-level CPU control functions for x86_64.

use super::registers::RFlags;
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
    let flags: u64;
    // SAFETY: reads RFLAGS through the stack.
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    RFlags::from_bits_truncate(flags).contains(RFlags::INTERRUPT)
}

/// Halt the CPU until the next interrupt
#[inline]
pub fn halt() {
    // SAFETY: resumes on the next interrupt.
    unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) }
}

/// Read CR3 (active page-table root)
#[inline]
pub fn read_cr3() -> u64 {
    let value: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) }
    value
}

/// Write CR3, switching address space and flushing non-global TLB entries
///
/// # Safety
/// `value` must be the root of a page table that maps the running kernel.
#[inline]
pub unsafe fn write_cr3(value: u64) {
    unsafe { asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)) }
}
