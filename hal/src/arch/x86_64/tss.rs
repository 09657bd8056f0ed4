//! # Task State Segment
//!
//! In long mode the TSS only carries stack pointers. `rsp0` is what the CPU
//! loads when an interrupt or syscall arrives from ring 3, so it must always
//! be the top of the running thread's kernel stack.

use core::mem::size_of;
use static_assertions::const_assert_eq;

/// Number of IST entries (Interrupt Stack Table)
pub const IST_ENTRIES: usize = 7;

/// Task State Segment
#[derive(Debug, Clone, Copy)]
#[repr(C, packed(4))]
pub struct TaskStateSegment {
    reserved_0: u32,
    /// Privilege Stack Table (RSP for ring 0, 1, 2)
    pub privilege_stack_table: [u64; 3],
    reserved_1: u64,
    /// Interrupt Stack Table (for IST1-IST7)
    pub interrupt_stack_table: [u64; IST_ENTRIES],
    reserved_2: u64,
    reserved_3: u16,
    /// I/O Map Base Address
    pub iomap_base: u16,
}

const_assert_eq!(size_of::<TaskStateSegment>(), 104);

impl TaskStateSegment {
    /// Create a new TSS with zeroed stacks
    pub const fn new() -> Self {
        Self {
            reserved_0: 0,
            privilege_stack_table: [0; 3],
            reserved_1: 0,
            interrupt_stack_table: [0; IST_ENTRIES],
            reserved_2: 0,
            reserved_3: 0,
            iomap_base: size_of::<Self>() as u16,
        }
    }

    /// Ring-0 stack pointer
    pub fn kernel_stack(&self) -> u64 {
        self.privilege_stack_table[0]
    }

    /// Set the ring-0 stack pointer
    pub fn set_kernel_stack(&mut self, top: u64) {
        self.privilege_stack_table[0] = top;
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod hardware {
    use super::TaskStateSegment;
    use core::ptr::addr_of_mut;

    // Referenced by the GDT descriptor the boot code installs.
    static mut TSS: TaskStateSegment = TaskStateSegment::new();

    /// The processor's TSS, for building its GDT descriptor
    pub fn tss_address() -> u64 {
        // SAFETY: only the address is taken.
        unsafe { addr_of_mut!(TSS) as u64 }
    }

    /// Update RSP0 in the live TSS
    ///
    /// # Safety
    /// `top` must be the top of a mapped kernel stack; interrupts must be off.
    pub unsafe fn set_kernel_stack(top: u64) {
        // SAFETY: single processor with interrupts disabled.
        unsafe { (*addr_of_mut!(TSS)).set_kernel_stack(top) }
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub use hardware::{set_kernel_stack, tss_address};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsp0_update() {
        let mut tss = TaskStateSegment::new();
        assert_eq!(tss.kernel_stack(), 0);
        tss.set_kernel_stack(0xFFFF_8000_0020_0000);
        assert_eq!(tss.kernel_stack(), 0xFFFF_8000_0020_0000);
        let iomap = tss.iomap_base;
        assert_eq!(iomap, 104);
    }
}
