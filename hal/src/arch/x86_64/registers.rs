//! # x86_64 Register Image
//!
//! Switch frame order (pushed first to last):
//! `rip, rflags, rax, rbx, rcx, rdx, rsi, rdi, rbp, r8..r15`.
//! `rip` is the return address left by the `call` into the switch routine,
//! so the routine ends with `popfq; ret`.
//!
//! The interrupt-return frame is the one `iretq` consumes:
//! `rip, cs, rflags, rsp, ss` from the lowest address up.

use super::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::cpu::{Privilege, RegisterState};
use crate::stack::FrameStack;
use crate::{PhysAddr, VirtAddr};
use bitflags::bitflags;
use core::mem::size_of;
use static_assertions::const_assert_eq;

bitflags! {
    /// RFLAGS bits the kernel sets or inspects
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        /// Carry
        const CARRY = 1 << 0;
        /// Always set
        const RESERVED = 1 << 1;
        /// Zero
        const ZERO = 1 << 6;
        /// Sign
        const SIGN = 1 << 7;
        /// Single-step trap
        const TRAP = 1 << 8;
        /// Interrupts enabled
        const INTERRUPT = 1 << 9;
        /// String direction
        const DIRECTION = 1 << 10;
        /// Overflow
        const OVERFLOW = 1 << 11;
    }
}

/// Flags a new thread starts with: interrupts on
pub const INITIAL_RFLAGS: u64 = RFlags::RESERVED.bits() | RFlags::INTERRUPT.bits();

/// Flags inside a synthetic switch frame: interrupts stay off until `iretq`
pub const SWITCH_RFLAGS: u64 = RFlags::RESERVED.bits();

/// Saved register image of an x86_64 thread
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ThreadRegisters {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub cr3: u64,
}

const_assert_eq!(size_of::<ThreadRegisters>(), 21 * 8);

/// Words in one switch frame: 15 GPRs, RFLAGS, RIP
pub const SWITCH_FRAME_WORDS: usize = 17;

impl ThreadRegisters {
    fn general_purpose(&self) -> [u64; 15] {
        [
            self.rax, self.rbx, self.rcx, self.rdx, self.rsi, self.rdi, self.rbp, self.r8,
            self.r9, self.r10, self.r11, self.r12, self.r13, self.r14, self.r15,
        ]
    }
}

impl RegisterState for ThreadRegisters {
    const ARCH: &'static str = "x86_64";
    const WORD_SIZE: usize = 8;
    const SWITCH_FRAME_SIZE: usize = SWITCH_FRAME_WORDS * 8;

    fn new_kernel(entry: VirtAddr, arg: u64, address_space: PhysAddr) -> Self {
        Self {
            rip: entry.as_u64(),
            rdi: arg,
            cs: u64::from(KERNEL_CODE_SELECTOR),
            ss: u64::from(KERNEL_DATA_SELECTOR),
            rflags: INITIAL_RFLAGS,
            cr3: address_space.as_u64(),
            ..Self::default()
        }
    }

    fn new_user(entry: VirtAddr, stack: VirtAddr, address_space: PhysAddr) -> Self {
        Self {
            rip: entry.as_u64(),
            rsp: stack.as_u64(),
            cs: u64::from(USER_CODE_SELECTOR),
            ss: u64::from(USER_DATA_SELECTOR),
            rflags: INITIAL_RFLAGS,
            cr3: address_space.as_u64(),
            ..Self::default()
        }
    }

    fn instruction_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.rip)
    }

    fn set_instruction_pointer(&mut self, ip: VirtAddr) {
        self.rip = ip.as_u64();
    }

    fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.rsp)
    }

    fn set_stack_pointer(&mut self, sp: VirtAddr) {
        self.rsp = sp.as_u64();
    }

    fn flags(&self) -> u64 {
        self.rflags
    }

    fn address_space(&self) -> PhysAddr {
        PhysAddr::new(self.cr3)
    }

    fn set_address_space(&mut self, root: PhysAddr) {
        self.cr3 = root.as_u64();
    }

    fn return_value(&self) -> u64 {
        self.rax
    }

    fn set_return_value(&mut self, value: u64) {
        self.rax = value;
    }

    fn argument(&self) -> u64 {
        self.rdi
    }

    fn privilege(&self) -> Privilege {
        if self.cs & 3 == 3 {
            Privilege::User
        } else {
            Privilege::Kernel
        }
    }

    fn push_word<S: FrameStack>(stack: &mut S, value: u64) {
        stack.push(value);
    }

    fn push_switch_frame<S: FrameStack>(&self, stack: &mut S) {
        stack.push(self.rip);
        stack.push(self.rflags);
        for value in self.general_purpose() {
            stack.push(value);
        }
    }

    fn pop_switch_frame<S: FrameStack>(&mut self, stack: &mut S) {
        self.r15 = stack.pop();
        self.r14 = stack.pop();
        self.r13 = stack.pop();
        self.r12 = stack.pop();
        self.r11 = stack.pop();
        self.r10 = stack.pop();
        self.r9 = stack.pop();
        self.r8 = stack.pop();
        self.rbp = stack.pop();
        self.rdi = stack.pop();
        self.rsi = stack.pop();
        self.rdx = stack.pop();
        self.rcx = stack.pop();
        self.rbx = stack.pop();
        self.rax = stack.pop();
        self.rflags = stack.pop();
        self.rip = stack.pop();
    }

    fn push_interrupt_frame<S: FrameStack>(&self, stack: &mut S) {
        stack.push(self.ss);
        stack.push(self.rsp);
        stack.push(self.rflags);
        stack.push(self.cs);
        stack.push(self.rip);
    }

    fn pop_interrupt_frame<S: FrameStack>(&mut self, stack: &mut S) {
        self.rip = stack.pop();
        self.cs = stack.pop();
        self.rflags = stack.pop();
        self.rsp = stack.pop();
        self.ss = stack.pop();
    }

    fn prepare_first_entry<S: FrameStack>(
        &self,
        stack: &mut S,
        trampoline: VirtAddr,
        on_return: Option<VirtAddr>,
    ) {
        let mut entry = *self;
        if let Some(ret) = on_return {
            // The entry function sees this slot as its caller's return address.
            stack.push(ret.as_u64());
            entry.rsp = stack.pointer() as u64;
        }
        entry.push_interrupt_frame(stack);

        let mut switch = entry;
        switch.rip = trampoline.as_u64();
        switch.rflags = SWITCH_RFLAGS;
        switch.push_switch_frame(stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;

    fn patterned() -> ThreadRegisters {
        ThreadRegisters {
            r15: 15, r14: 14, r13: 13, r12: 12, r11: 11, r10: 10, r9: 9, r8: 8,
            rbp: 0xB0, rdi: 0xD1, rsi: 0x51, rdx: 0xD0, rcx: 0xC0, rbx: 0xB1, rax: 0xA0,
            rip: 0xFFFF_8000_0010_0000,
            rflags: INITIAL_RFLAGS | RFlags::CARRY.bits(),
            ..ThreadRegisters::default()
        }
    }

    #[test]
    fn test_switch_frame_roundtrip_restores_every_register() {
        let mut stack = Stack::new(1024).unwrap();
        let saved = patterned();
        saved.push_switch_frame(&mut stack);
        assert_eq!(stack.offset(), ThreadRegisters::SWITCH_FRAME_SIZE);

        let mut restored = ThreadRegisters::default();
        restored.pop_switch_frame(&mut stack);
        assert_eq!(restored, ThreadRegisters { cs: 0, ss: 0, rsp: 0, cr3: 0, ..saved });
        assert_eq!(stack.offset(), 0);
    }

    #[test]
    fn test_switch_frame_order_matches_push_sequence() {
        let mut stack = Stack::new(1024).unwrap();
        patterned().push_switch_frame(&mut stack);
        // Lowest address holds the last push.
        assert_eq!(stack.pop::<u64>(), 15);
        for _ in 0..13 {
            let _: u64 = stack.pop();
        }
        assert_eq!(stack.pop::<u64>(), 0xA0);
        assert_eq!(stack.pop::<u64>(), INITIAL_RFLAGS | RFlags::CARRY.bits());
        assert_eq!(stack.pop::<u64>(), 0xFFFF_8000_0010_0000);
    }

    #[test]
    fn test_kernel_first_entry_layout() {
        let mut stack = Stack::new(4096).unwrap();
        let regs = ThreadRegisters::new_kernel(VirtAddr::new(0x1000), 77, PhysAddr::new(0x9000));
        regs.prepare_first_entry(&mut stack, VirtAddr::new(0x2000), Some(VirtAddr::new(0x3000)));

        let mut cpu = ThreadRegisters::default();
        cpu.pop_switch_frame(&mut stack);
        assert_eq!(cpu.rip, 0x2000);
        assert_eq!(cpu.rdi, 77);
        assert_eq!(cpu.rflags & RFlags::INTERRUPT.bits(), 0);

        cpu.pop_interrupt_frame(&mut stack);
        assert_eq!(cpu.rip, 0x1000);
        assert_eq!(cpu.cs, u64::from(KERNEL_CODE_SELECTOR));
        assert_eq!(cpu.rflags, INITIAL_RFLAGS);
        assert_eq!(cpu.rsp as usize, stack.value());
        assert_eq!(stack.pop::<u64>(), 0x3000);
        assert_eq!(stack.offset(), 0);
    }

    #[test]
    fn test_user_registers_run_at_ring3() {
        let regs = ThreadRegisters::new_user(VirtAddr::new(0x40_0000), VirtAddr::new(0x7FFF_0000), PhysAddr::new(0));
        assert_eq!(regs.privilege(), Privilege::User);
        assert_eq!(regs.ss, u64::from(USER_DATA_SELECTOR));
        assert_eq!(ThreadRegisters::new_kernel(VirtAddr::new(0), 0, PhysAddr::new(0)).privilege(), Privilege::Kernel);
    }
}
