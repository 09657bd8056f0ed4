//! # Context Switch
//!
//! Assembly routines for switching between threads, and the bare-metal
//! [`Processor`] built on them.
//!
//! `ember_switch_context(from_sp, to_sp)` pushes the full switch frame
//! (the call's return address is the saved RIP), stores RSP through
//! `from_sp`, loads `to_sp` and pops the incoming frame in reverse.
//! The frame layout is the one [`ThreadRegisters::push_switch_frame`]
//! describes.

use super::registers::ThreadRegisters;
use super::{cpu, tss};
use crate::cpu::{thread_exit, Processor};
use crate::{PhysAddr, VirtAddr};
use core::arch::global_asm;

global_asm!(
    ".global ember_switch_context",
    "ember_switch_context:",
    "    pushfq",
    "    push rax",
    "    push rbx",
    "    push rcx",
    "    push rdx",
    "    push rsi",
    "    push rdi",
    "    push rbp",
    "    push r8",
    "    push r9",
    "    push r10",
    "    push r11",
    "    push r12",
    "    push r13",
    "    push r14",
    "    push r15",
    "    mov [rdi], rsp",
    "    mov rsp, rsi",
    "ember_restore_context:",
    "    pop r15",
    "    pop r14",
    "    pop r13",
    "    pop r12",
    "    pop r11",
    "    pop r10",
    "    pop r9",
    "    pop r8",
    "    pop rbp",
    "    pop rdi",
    "    pop rsi",
    "    pop rdx",
    "    pop rcx",
    "    pop rbx",
    "    pop rax",
    "    popfq",
    "    ret",
    "",
    ".global ember_start_context",
    "ember_start_context:",
    "    mov rsp, rdi",
    "    jmp ember_restore_context",
    "",
    // First entry: GPRs already restored by the switch frame.
    ".global ember_thread_trampoline",
    "ember_thread_trampoline:",
    "    iretq",
    "",
    // Kernel entry functions return here with their value in RAX.
    ".global ember_thread_return",
    "ember_thread_return:",
    "    mov rdi, rax",
    "    and rsp, -16",
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
    address_space: u64,
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
        "x86_64"
    }

    fn trampoline(&self) -> VirtAddr {
        VirtAddr::new(ember_thread_trampoline as usize as u64)
    }

    fn thread_return(&self) -> VirtAddr {
        VirtAddr::new(ember_thread_return as usize as u64)
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        // SAFETY: called by the scheduler with interrupts disabled.
        unsafe { tss::set_kernel_stack(top.as_u64()) }
    }

    fn load_address_space(&mut self, root: PhysAddr) {
        if root.as_u64() != self.address_space {
            // SAFETY: every address space maps the kernel half.
            unsafe { cpu::write_cr3(root.as_u64()) }
            self.address_space = root.as_u64();
        }
    }

    unsafe fn switch_context(&mut self, from_sp: *mut usize, to_sp: usize) {
        unsafe { ember_switch_context(from_sp, to_sp) }
    }

    unsafe fn start(&mut self, to_sp: usize) {
        unsafe { ember_start_context(to_sp) }
    }
}
