//! # Context Switch (32-bit)
//!
//! `ember_switch_context(from_sp, to_sp)` is cdecl: both arguments sit on
//! the stack above the return address, which doubles as the saved EIP.

use super::registers::ThreadRegisters;
use super::{cpu, tss};
use crate::cpu::{thread_exit, Processor};
use crate::{PhysAddr, VirtAddr};
use core::arch::global_asm;

global_asm!(
    ".global ember_switch_context",
    "ember_switch_context:",
    "    pushfd",
    "    push eax",
    "    push ecx",
    "    push edx",
    "    push ebx",
    "    push ebp",
    "    push esi",
    "    push edi",
    "    push ds",
    "    push es",
    "    push fs",
    "    push gs",
    // 12 slots pushed plus the return address.
    "    mov eax, [esp + 52]",
    "    mov [eax], esp",
    "    mov esp, [esp + 56]",
    "ember_restore_context:",
    "    pop gs",
    "    pop fs",
    "    pop es",
    "    pop ds",
    "    pop edi",
    "    pop esi",
    "    pop ebp",
    "    pop ebx",
    "    pop edx",
    "    pop ecx",
    "    pop eax",
    "    popfd",
    "    ret",
    "",
    ".global ember_start_context",
    "ember_start_context:",
    "    mov esp, [esp + 4]",
    "    jmp ember_restore_context",
    "",
    ".global ember_thread_trampoline",
    "ember_thread_trampoline:",
    "    iretd",
    "",
    ".global ember_thread_return",
    "ember_thread_return:",
    "    push eax",
    "    call {exit}",
    "    ud2",
    exit = sym thread_exit,
);

extern "C" {
    fn ember_switch_context(from_sp: *mut usize, to_sp: usize);
    fn ember_start_context(to_sp: usize) -> !;
    fn ember_thread_trampoline();
    fn ember_thread_return();
}

/// The bootstrap processor
#[derive(Debug, Default)]
pub struct Cpu {
    address_space: u32,
}

impl Cpu {
    /// Wrap the running processor
    pub fn new() -> Self {
        Self {
            address_space: cpu::read_cr3(),
        }
    }
}

impl Processor for Cpu {
    type Registers = ThreadRegisters;

    fn name(&self) -> &'static str {
        "x86"
    }

    fn trampoline(&self) -> VirtAddr {
        VirtAddr::new(ember_thread_trampoline as usize as u64)
    }

    fn thread_return(&self) -> VirtAddr {
        VirtAddr::new(ember_thread_return as usize as u64)
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        // SAFETY: called by the scheduler with interrupts disabled.
        unsafe { tss::set_kernel_stack(top.as_u64() as u32) }
    }

    fn load_address_space(&mut self, root: PhysAddr) {
        let root = root.as_u64() as u32;
        if root != self.address_space {
            // SAFETY: every address space maps the kernel half.
            unsafe { cpu::write_cr3(root) }
            self.address_space = root;
        }
    }

    unsafe fn switch_context(&mut self, from_sp: *mut usize, to_sp: usize) {
        unsafe { ember_switch_context(from_sp, to_sp) }
    }

    unsafe fn start(&mut self, to_sp: usize) {
        unsafe { ember_start_context(to_sp) }
    }
}
