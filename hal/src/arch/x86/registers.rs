//! # x86 (32-bit) Register Image
//!
//! Switch frame order (pushed first to last):
//! `eip, eflags, eax, ecx, edx, ebx, ebp, esi, edi, ds, es, fs, gs`,
//! every slot 32 bits wide.
//!
//! `iret` pops `eip, cs, eflags` and, only when returning to ring 3,
//! `esp, ss`. A kernel thread therefore finds its cdecl argument and return
//! address directly above the interrupt frame.

use super::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::cpu::{Privilege, RegisterState};
use crate::stack::FrameStack;
use crate::{PhysAddr, VirtAddr};
use bitflags::bitflags;
use core::mem::size_of;
use static_assertions::const_assert_eq;

bitflags! {
    /// EFLAGS bits the kernel sets or inspects
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EFlags: u32 {
        /// Carry
        const CARRY = 1 << 0;
        /// Always set
        const RESERVED = 1 << 1;
        /// Zero
        const ZERO = 1 << 6;
        /// Interrupts enabled
        const INTERRUPT = 1 << 9;
        /// String direction
        const DIRECTION = 1 << 10;
    }
}

/// Flags a new thread starts with: interrupts on
pub const INITIAL_EFLAGS: u32 = EFlags::RESERVED.bits() | EFlags::INTERRUPT.bits();

const SWITCH_EFLAGS: u32 = EFlags::RESERVED.bits();

/// Saved register image of a 32-bit thread
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ThreadRegisters {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
    pub cr3: u32,
}

const_assert_eq!(size_of::<ThreadRegisters>(), 17 * 4);

/// Words in one switch frame: 7 GPRs, 4 segments, EFLAGS, EIP
pub const SWITCH_FRAME_WORDS: usize = 13;

// Addresses on this architecture are 32 bits wide.
fn narrow(value: u64) -> u32 {
    value as u32
}

impl ThreadRegisters {
    fn with_segments(mut self, code: u16, data: u16) -> Self {
        self.cs = u32::from(code);
        self.ss = u32::from(data);
        self.ds = u32::from(data);
        self.es = u32::from(data);
        self.fs = u32::from(data);
        self.gs = u32::from(data);
        self
    }
}

impl RegisterState for ThreadRegisters {
    const ARCH: &'static str = "x86";
    const WORD_SIZE: usize = 4;
    const SWITCH_FRAME_SIZE: usize = SWITCH_FRAME_WORDS * 4;

    fn new_kernel(entry: VirtAddr, arg: u64, address_space: PhysAddr) -> Self {
        Self {
            eip: narrow(entry.as_u64()),
            eax: narrow(arg),
            eflags: INITIAL_EFLAGS,
            cr3: narrow(address_space.as_u64()),
            ..Self::default()
        }
        .with_segments(KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR)
    }

    fn new_user(entry: VirtAddr, stack: VirtAddr, address_space: PhysAddr) -> Self {
        Self {
            eip: narrow(entry.as_u64()),
            esp: narrow(stack.as_u64()),
            eflags: INITIAL_EFLAGS,
            cr3: narrow(address_space.as_u64()),
            ..Self::default()
        }
        .with_segments(USER_CODE_SELECTOR, USER_DATA_SELECTOR)
    }

    fn instruction_pointer(&self) -> VirtAddr {
        VirtAddr::new(u64::from(self.eip))
    }

    fn set_instruction_pointer(&mut self, ip: VirtAddr) {
        self.eip = narrow(ip.as_u64());
    }

    fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(u64::from(self.esp))
    }

    fn set_stack_pointer(&mut self, sp: VirtAddr) {
        self.esp = narrow(sp.as_u64());
    }

    fn flags(&self) -> u64 {
        u64::from(self.eflags)
    }

    fn address_space(&self) -> PhysAddr {
        PhysAddr::new(u64::from(self.cr3))
    }

    fn set_address_space(&mut self, root: PhysAddr) {
        self.cr3 = narrow(root.as_u64());
    }

    fn return_value(&self) -> u64 {
        u64::from(self.eax)
    }

    fn set_return_value(&mut self, value: u64) {
        self.eax = narrow(value);
    }

    fn argument(&self) -> u64 {
        u64::from(self.eax)
    }

    fn privilege(&self) -> Privilege {
        if self.cs & 3 == 3 {
            Privilege::User
        } else {
            Privilege::Kernel
        }
    }

    fn push_word<S: FrameStack>(stack: &mut S, value: u64) {
        stack.push(narrow(value));
    }

    fn push_switch_frame<S: FrameStack>(&self, stack: &mut S) {
        for value in [
            self.eip, self.eflags, self.eax, self.ecx, self.edx, self.ebx, self.ebp, self.esi,
            self.edi, self.ds, self.es, self.fs, self.gs,
        ] {
            stack.push(value);
        }
    }

    fn pop_switch_frame<S: FrameStack>(&mut self, stack: &mut S) {
        self.gs = stack.pop();
        self.fs = stack.pop();
        self.es = stack.pop();
        self.ds = stack.pop();
        self.edi = stack.pop();
        self.esi = stack.pop();
        self.ebp = stack.pop();
        self.ebx = stack.pop();
        self.edx = stack.pop();
        self.ecx = stack.pop();
        self.eax = stack.pop();
        self.eflags = stack.pop();
        self.eip = stack.pop();
    }

    fn push_interrupt_frame<S: FrameStack>(&self, stack: &mut S) {
        if self.privilege() == Privilege::User {
            stack.push(self.ss);
            stack.push(self.esp);
        }
        stack.push(self.eflags);
        stack.push(self.cs);
        stack.push(self.eip);
    }

    fn pop_interrupt_frame<S: FrameStack>(&mut self, stack: &mut S) {
        self.eip = stack.pop();
        self.cs = stack.pop();
        self.eflags = stack.pop();
        if self.privilege() == Privilege::User {
            self.esp = stack.pop();
            self.ss = stack.pop();
        }
    }

    fn prepare_first_entry<S: FrameStack>(
        &self,
        stack: &mut S,
        trampoline: VirtAddr,
        on_return: Option<VirtAddr>,
    ) {
        let mut entry = *self;
        if let Some(ret) = on_return {
            // cdecl: argument above the return address.
            stack.push(self.eax);
            stack.push(narrow(ret.as_u64()));
            entry.esp = narrow(stack.pointer() as u64);
        }
        entry.push_interrupt_frame(stack);

        let mut switch = entry;
        switch.eip = narrow(trampoline.as_u64());
        switch.eflags = SWITCH_EFLAGS;
        switch.push_switch_frame(stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;

    #[test]
    fn test_switch_frame_is_thirteen_words() {
        let mut stack = Stack::new(256).unwrap();
        ThreadRegisters::default().push_switch_frame(&mut stack);
        assert_eq!(stack.offset(), 52);
        assert_eq!(ThreadRegisters::SWITCH_FRAME_SIZE, 52);
    }

    #[test]
    fn test_switch_frame_roundtrip() {
        let mut stack = Stack::new(256).unwrap();
        let saved = ThreadRegisters {
            eax: 1, ecx: 2, edx: 3, ebx: 4, ebp: 5, esi: 6, edi: 7,
            ds: 0x23, es: 0x23, fs: 0x23, gs: 0x23,
            eip: 0xC000_1234, eflags: INITIAL_EFLAGS,
            ..ThreadRegisters::default()
        };
        saved.push_switch_frame(&mut stack);
        let mut restored = ThreadRegisters::default();
        restored.pop_switch_frame(&mut stack);
        assert_eq!(restored, saved);
    }

    #[test]
    fn test_kernel_entry_has_cdecl_argument() {
        let mut stack = Stack::new(512).unwrap();
        let regs = ThreadRegisters::new_kernel(VirtAddr::new(0xC000_0000), 0x55, PhysAddr::new(0));
        regs.prepare_first_entry(&mut stack, VirtAddr::new(0xC010_0000), Some(VirtAddr::new(0xC010_0010)));

        let mut cpu = ThreadRegisters::default();
        cpu.pop_switch_frame(&mut stack);
        assert_eq!(cpu.eip, 0xC010_0000);
        cpu.pop_interrupt_frame(&mut stack);
        assert_eq!(cpu.eip, 0xC000_0000);
        // Ring-0 iret leaves the stack pointing at the return address.
        assert_eq!(stack.pop::<u32>(), 0xC010_0010);
        assert_eq!(stack.pop::<u32>(), 0x55);
        assert_eq!(stack.offset(), 0);
    }

    #[test]
    fn test_user_interrupt_frame_carries_stack() {
        let mut stack = Stack::new(256).unwrap();
        let regs = ThreadRegisters::new_user(VirtAddr::new(0x0804_8000), VirtAddr::new(0xBFFF_F000), PhysAddr::new(0));
        regs.push_interrupt_frame(&mut stack);
        assert_eq!(stack.offset(), 20);
        let mut cpu = ThreadRegisters::default();
        cpu.pop_interrupt_frame(&mut stack);
        assert_eq!(cpu.esp, 0xBFFF_F000);
        assert_eq!(cpu.ss, u32::from(USER_DATA_SELECTOR));
    }
}
