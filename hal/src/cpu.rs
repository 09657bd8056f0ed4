//! # CPU Abstraction
//!
//! The two seams between the scheduler and the processor:
//!
//! - [`RegisterState`]: a thread's saved register image and the fixed order
//!   in which it is pushed onto and popped off a kernel stack
//! - [`Processor`]: the context switch itself and its side effects (TSS,
//!   address-space root)

use crate::stack::FrameStack;
use crate::{PhysAddr, VirtAddr};
use core::fmt::Debug;
use spin::Once;

/// Privilege level a register image executes at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Ring 0
    Kernel,
    /// Ring 3
    User,
}

/// Saved register image of a thread
///
/// One implementation exists per architecture. The 32-bit and 64-bit
/// layouts differ in width and field count but expose the same fields.
pub trait RegisterState: Copy + Default + Debug + Eq + Send + Sync + 'static {
    /// Architecture name
    const ARCH: &'static str;

    /// Machine word size in bytes
    const WORD_SIZE: usize;

    /// Bytes occupied by one switch frame on a kernel stack
    const SWITCH_FRAME_SIZE: usize;

    /// Registers for a kernel thread entering `entry(arg)`
    fn new_kernel(entry: VirtAddr, arg: u64, address_space: PhysAddr) -> Self;

    /// Registers for a user thread entering `entry` with stack pointer `stack`
    fn new_user(entry: VirtAddr, stack: VirtAddr, address_space: PhysAddr) -> Self;

    /// Instruction pointer
    fn instruction_pointer(&self) -> VirtAddr;

    /// Set the instruction pointer
    fn set_instruction_pointer(&mut self, ip: VirtAddr);

    /// Stack pointer
    fn stack_pointer(&self) -> VirtAddr;

    /// Set the stack pointer
    fn set_stack_pointer(&mut self, sp: VirtAddr);

    /// Flags register
    fn flags(&self) -> u64;

    /// Address-space root (CR3)
    fn address_space(&self) -> PhysAddr;

    /// Set the address-space root
    fn set_address_space(&mut self, root: PhysAddr);

    /// Syscall return value register
    fn return_value(&self) -> u64;

    /// Set the syscall return value register
    fn set_return_value(&mut self, value: u64);

    /// First argument of the entry function
    fn argument(&self) -> u64;

    /// Privilege level of the code segment
    fn privilege(&self) -> Privilege;

    /// Push one machine word
    fn push_word<S: FrameStack>(stack: &mut S, value: u64);

    /// Push general-purpose registers, flags and IP in switch order
    fn push_switch_frame<S: FrameStack>(&self, stack: &mut S);

    /// Pop a switch frame; exact inverse of [`Self::push_switch_frame`]
    fn pop_switch_frame<S: FrameStack>(&mut self, stack: &mut S);

    /// Push the frame consumed by the interrupt-return instruction
    fn push_interrupt_frame<S: FrameStack>(&self, stack: &mut S);

    /// Pop an interrupt-return frame
    fn pop_interrupt_frame<S: FrameStack>(&mut self, stack: &mut S);

    /// Build the synthetic image a new thread is first switched into
    ///
    /// Popping a switch frame off `stack` lands in `trampoline`, which
    /// performs an interrupt return into `self`. Kernel threads pass
    /// `on_return`, the address their entry function returns to.
    fn prepare_first_entry<S: FrameStack>(
        &self,
        stack: &mut S,
        trampoline: VirtAddr,
        on_return: Option<VirtAddr>,
    );
}

/// The processor the scheduler switches threads on
pub trait Processor: Send {
    /// Register layout of this processor
    type Registers: RegisterState;

    /// Processor name, for diagnostics
    fn name(&self) -> &'static str;

    /// Address of the first-entry trampoline
    fn trampoline(&self) -> VirtAddr;

    /// Address kernel entry functions return into
    fn thread_return(&self) -> VirtAddr;

    /// Load the stack used on the next user-to-kernel transition (TSS)
    fn set_kernel_stack(&mut self, top: VirtAddr);

    /// Load an address-space root
    fn load_address_space(&mut self, root: PhysAddr);

    /// Save the running thread on its kernel stack and resume another
    ///
    /// Pushes the full register image, stores the resulting stack pointer
    /// through `from_sp`, then pops the image saved at `to_sp`.
    ///
    /// # Safety
    /// Interrupts must be disabled. `to_sp` must be a pointer previously
    /// produced by a switch or by [`RegisterState::prepare_first_entry`], on
    /// a stack that stays alive while its thread can run.
    unsafe fn switch_context(&mut self, from_sp: *mut usize, to_sp: usize);

    /// Enter the first thread, discarding the boot context
    ///
    /// On hardware this does not return.
    ///
    /// # Safety
    /// Same requirements on `to_sp` as [`Processor::switch_context`].
    unsafe fn start(&mut self, to_sp: usize);
}

static THREAD_EXIT_HOOK: Once<fn(usize) -> !> = Once::new();

/// Install the routine run when a kernel thread's entry function returns
///
/// Only the first installation takes effect.
pub fn set_thread_exit_hook(hook: fn(usize) -> !) {
    THREAD_EXIT_HOOK.call_once(|| hook);
}

/// Called with a kernel thread's return value when its entry function returns
pub extern "C" fn thread_exit(value: usize) -> ! {
    match THREAD_EXIT_HOOK.get() {
        Some(hook) => hook(value),
        None => {
            log::error!("thread_exit({:#x}) before set_thread_exit_hook", value);
            panic!("kernel thread returned {:#x} with no exit hook installed", value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_to_panic(value: usize) -> ! {
        panic!("thread finished with {}", value)
    }

    #[test]
    #[should_panic(expected = "thread finished with 7")]
    fn test_thread_exit_runs_hook() {
        set_thread_exit_hook(exit_to_panic);
        thread_exit(7);
    }
}
