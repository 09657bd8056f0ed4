//! # Simulated Processor
//!
//! A [`Processor`] for hosted builds. It keeps a register file and a live
//! kernel stack pointer in memory and performs the same push/pop sequence as
//! the assembly routines, on the threads' real kernel stacks. Reaching the
//! trampoline emulates the interrupt return into the thread's entry point.
//!
//! A thread switched out while at user privilege is treated as having
//! entered the kernel first: its user image goes onto its kernel stack as an
//! interrupt frame, below a switch frame that resumes at [`SIM_USER_RETURN`].
//!
//! Every side effect (TSS loads, address-space loads, first entries) is
//! recorded so callers can check the switch protocol.

use crate::cpu::{Privilege, Processor, RegisterState};
use crate::stack::{FrameStack, RawStack};
use crate::{PhysAddr, VirtAddr};
use alloc::vec::Vec;

/// Address standing in for the first-entry trampoline
pub const SIM_TRAMPOLINE: VirtAddr = VirtAddr::new(0xC010_0000);

/// Address standing in for the kernel-thread return stub
pub const SIM_THREAD_RETURN: VirtAddr = VirtAddr::new(0xC010_0040);

/// Address standing in for the kernel's return-to-user path
pub const SIM_USER_RETURN: VirtAddr = VirtAddr::new(0xC010_0080);

/// Hosted stand-in for the CPU
#[derive(Debug, Default)]
pub struct SimulatedProcessor<R: RegisterState> {
    registers: R,
    stack_pointer: usize,
    kernel_stack: VirtAddr,
    address_space: PhysAddr,
    address_space_loads: usize,
    switches: usize,
    entries: Vec<R>,
}

impl<R: RegisterState> SimulatedProcessor<R> {
    /// Processor with zeroed registers that has not started a thread
    pub fn new() -> Self {
        Self {
            registers: R::default(),
            stack_pointer: 0,
            kernel_stack: VirtAddr::new(0),
            address_space: PhysAddr::new(0),
            address_space_loads: 0,
            switches: 0,
            entries: Vec::new(),
        }
    }

    /// Live register file of the running thread
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Mutable register file, as if the running thread computed something
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    /// Live kernel stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// Last value loaded into the TSS kernel stack slot
    pub fn kernel_stack(&self) -> VirtAddr {
        self.kernel_stack
    }

    /// Active address-space root
    pub fn address_space(&self) -> PhysAddr {
        self.address_space
    }

    /// Number of address-space loads performed
    pub fn address_space_loads(&self) -> usize {
        self.address_space_loads
    }

    /// Number of frames popped into the register file (switches and start)
    pub fn switches(&self) -> usize {
        self.switches
    }

    /// Register file at each first entry, in order
    pub fn entries(&self) -> &[R] {
        &self.entries
    }

    unsafe fn resume(&mut self, to_sp: usize) {
        // SAFETY: the caller guarantees `to_sp` addresses a saved frame.
        let mut incoming = unsafe { RawStack::new(to_sp) };
        self.registers.pop_switch_frame(&mut incoming);
        let ip = self.registers.instruction_pointer();
        if ip == SIM_TRAMPOLINE {
            self.registers.pop_interrupt_frame(&mut incoming);
            self.entries.push(self.registers);
        } else if ip == SIM_USER_RETURN {
            self.registers.pop_interrupt_frame(&mut incoming);
        }
        match self.registers.privilege() {
            // Later kernel entries start at the top of the TSS stack.
            Privilege::User => self.stack_pointer = self.kernel_stack.as_u64() as usize,
            Privilege::Kernel => {
                self.stack_pointer = incoming.pointer();
                self.registers.set_stack_pointer(VirtAddr::new(self.stack_pointer as u64));
            }
        }
        self.switches += 1;
    }
}

impl<R: RegisterState> Processor for SimulatedProcessor<R> {
    type Registers = R;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn trampoline(&self) -> VirtAddr {
        SIM_TRAMPOLINE
    }

    fn thread_return(&self) -> VirtAddr {
        SIM_THREAD_RETURN
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        self.kernel_stack = top;
    }

    fn load_address_space(&mut self, root: PhysAddr) {
        self.address_space = root;
        self.registers.set_address_space(root);
        self.address_space_loads += 1;
    }

    unsafe fn switch_context(&mut self, from_sp: *mut usize, to_sp: usize) {
        assert!(self.stack_pointer != 0, "context switch before the first thread started");
        // SAFETY: the live stack pointer lies inside the outgoing thread's stack.
        let mut outgoing = unsafe { RawStack::new(self.stack_pointer) };
        if self.registers.privilege() == Privilege::User {
            self.registers.push_interrupt_frame(&mut outgoing);
            let mut kernel = self.registers;
            kernel.set_instruction_pointer(SIM_USER_RETURN);
            kernel.push_switch_frame(&mut outgoing);
        } else {
            self.registers.push_switch_frame(&mut outgoing);
        }
        // SAFETY: the caller guarantees `from_sp` is writable.
        unsafe { *from_sp = outgoing.pointer() };
        unsafe { self.resume(to_sp) }
    }

    unsafe fn start(&mut self, to_sp: usize) {
        unsafe { self.resume(to_sp) }
    }
}
