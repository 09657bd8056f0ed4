//! # x86_64
//!
//! 64-bit register image, TSS, and on bare metal the CPU control and
//! context-switch routines.

pub mod registers;
pub mod tss;

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub mod cpu;
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub mod switch;

pub use registers::{RFlags, ThreadRegisters};

/// Kernel code segment selector
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Kernel data segment selector
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// User data segment selector (RPL 3)
pub const USER_DATA_SELECTOR: u16 = 0x18 | 3;
/// User code segment selector (RPL 3)
pub const USER_CODE_SELECTOR: u16 = 0x20 | 3;
/// TSS selector
pub const TSS_SELECTOR: u16 = 0x28;
