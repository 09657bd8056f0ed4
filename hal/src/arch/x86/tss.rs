//! # Task State Segment (32-bit)
//!
//! Only `esp0`/`ss0` matter: the stack loaded when an interrupt arrives
//! from ring 3.

use super::KERNEL_DATA_SELECTOR;
use core::mem::size_of;
use static_assertions::const_assert_eq;

/// 32-bit Task State Segment
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TaskStateSegment {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldt: u32,
    pub trap: u16,
    pub iomap_base: u16,
}

const_assert_eq!(size_of::<TaskStateSegment>(), 104);

impl TaskStateSegment {
    /// TSS with the kernel stack segment set and no I/O bitmap
    pub const fn new() -> Self {
        Self {
            link: 0, esp0: 0, ss0: KERNEL_DATA_SELECTOR as u32, esp1: 0, ss1: 0, esp2: 0, ss2: 0,
            cr3: 0, eip: 0, eflags: 0, eax: 0, ecx: 0, edx: 0, ebx: 0, esp: 0, ebp: 0, esi: 0,
            edi: 0, es: 0, cs: 0, ss: 0, ds: 0, fs: 0, gs: 0, ldt: 0, trap: 0,
            iomap_base: size_of::<Self>() as u16,
        }
    }

    /// Set the ring-0 stack pointer
    pub fn set_kernel_stack(&mut self, top: u32) {
        self.esp0 = top;
    }
}

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod hardware {
    use super::TaskStateSegment;
    use core::ptr::addr_of_mut;

    static mut TSS: TaskStateSegment = TaskStateSegment::new();

    /// The processor's TSS, for building its GDT descriptor
    pub fn tss_address() -> u32 {
        // SAFETY: only the address is taken.
        unsafe { addr_of_mut!(TSS) as u32 }
    }

    /// Update ESP0 in the live TSS
    ///
    /// # Safety
    /// `top` must be the top of a mapped kernel stack; interrupts must be off.
    pub unsafe fn set_kernel_stack(top: u32) {
        // SAFETY: single processor with interrupts disabled.
        unsafe { (*addr_of_mut!(TSS)).set_kernel_stack(top) }
    }
}

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use hardware::{set_kernel_stack, tss_address};
