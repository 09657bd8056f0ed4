//! # Architecture-Specific HAL Modules
//!
//! Both register layouts are always compiled so either can be exercised on
//! a hosted build; the instruction-level pieces (cli/sti, CR3, TSS, switch
//! routines) exist only for the matching bare-metal target.

pub mod x86;
pub mod x86_64;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86")] {
        pub use self::x86 as current;
    } else {
        pub use self::x86_64 as current;
    }
}

/// Register layout of the architecture being built for
pub type NativeRegisters = current::ThreadRegisters;
