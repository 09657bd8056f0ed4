//! # Thread Structure
//!
//! Core thread data structure.

use super::{ProcessArguments, ThreadState};
use crate::blocker::Blocker;
use crate::{ProcessId, ThreadId};
use alloc::string::String;
use ember_hal::cpu::RegisterState;
use ember_hal::stack::Stack;
use ember_hal::{PhysAddr, VirtAddr};

/// Thread flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Thread flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct ThreadFlags: u32 {
            /// Runs only in ring 0
            const KERNEL = 1 << 0;
            /// Has a user half
            const USER = 1 << 1;
            /// The idle thread
            const IDLE = 1 << 2;
            /// First thread of its process image
            const MAIN = 1 << 3;
            /// Created by fork
            const FORKED = 1 << 4;
        }
    }
}

pub use flags::ThreadFlags;

/// Entry function of a kernel thread
///
/// The return value becomes the thread's exit value.
pub type KernelEntry = extern "C" fn(usize) -> usize;

/// Where a new thread starts executing
#[derive(Debug)]
pub enum ThreadEntry<R> {
    /// Kernel function called with one word
    Kernel {
        /// Entry function
        function: KernelEntry,
        /// Its argument
        argument: usize,
    },
    /// User program entry with its argument package
    User {
        /// User-mode entry point
        entry: VirtAddr,
        /// Mapped user stack the package is written to
        stack: Stack,
        /// argv and envp
        arguments: ProcessArguments,
    },
    /// Copy of a thread interrupted at a syscall
    Fork {
        /// The caller's registers at syscall entry
        registers: R,
    },
}

/// Everything [`Thread::create`] needs besides the entry
#[derive(Debug)]
pub struct ThreadSetup {
    /// New thread id
    pub id: ThreadId,
    /// Owning process
    pub process: ProcessId,
    /// Diagnostic name
    pub name: String,
    /// Address space the thread runs in
    pub address_space: PhysAddr,
    /// Kernel stack, empty
    pub kernel_stack: Stack,
    /// First-entry trampoline of the processor
    pub trampoline: VirtAddr,
    /// Where kernel entry functions return to
    pub thread_return: VirtAddr,
}

#[derive(Debug)]
enum Status {
    Running,
    Blocked(Blocker),
    Zombie,
    Dead,
}

/// Thread structure
#[derive(Debug)]
pub struct Thread<R: RegisterState> {
    /// Unique identifier
    id: ThreadId,
    /// Owning process
    process: ProcessId,
    /// Thread name
    name: String,
    /// Current state; a blocked thread owns its blocker
    status: Status,
    /// Flags
    flags: ThreadFlags,
    /// Register image the thread was created with
    entry_registers: R,
    /// Kernel stack
    kernel_stack: Stack,
    /// User stack, when the thread owns one
    user_stack: Option<Stack>,
    /// Kernel stack pointer saved at the last switch away
    saved_sp: usize,
    /// Exit value
    exit_value: Option<usize>,
    /// Ticks left in the current time slice
    remaining_ticks: u32,
}

impl<R: RegisterState> Thread<R> {
    /// Create a thread whose first switch-in enters `entry`
    pub fn create(setup: ThreadSetup, entry: ThreadEntry<R>) -> Self {
        let ThreadSetup {
            id,
            process,
            name,
            address_space,
            mut kernel_stack,
            trampoline,
            thread_return,
        } = setup;

        let (registers, user_stack, flags, on_return) = match entry {
            ThreadEntry::Kernel { function, argument } => (
                R::new_kernel(VirtAddr::new(function as usize as u64), argument as u64, address_space),
                None,
                ThreadFlags::KERNEL,
                Some(thread_return),
            ),
            ThreadEntry::User { entry, mut stack, arguments } => {
                let sp = arguments.push_onto::<R>(&mut stack);
                (
                    R::new_user(entry, VirtAddr::new(sp as u64), address_space),
                    Some(stack),
                    ThreadFlags::USER | ThreadFlags::MAIN,
                    None,
                )
            }
            ThreadEntry::Fork { mut registers } => {
                registers.set_return_value(0);
                registers.set_address_space(address_space);
                (registers, None, ThreadFlags::USER | ThreadFlags::FORKED, None)
            }
        };

        registers.prepare_first_entry(&mut kernel_stack, trampoline, on_return);
        let saved_sp = kernel_stack.value();

        Self {
            id,
            process,
            name,
            status: Status::Running,
            flags,
            entry_registers: registers,
            kernel_stack,
            user_stack,
            saved_sp,
            exit_value: None,
            remaining_ticks: 0,
        }
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get process ID
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current state
    pub fn state(&self) -> ThreadState {
        match &self.status {
            Status::Running => ThreadState::Running,
            Status::Blocked(blocker) => blocker.blocked_state(),
            Status::Zombie => ThreadState::Zombie,
            Status::Dead => ThreadState::Dead,
        }
    }

    /// Blocker the thread waits on, if blocked
    pub fn blocker(&self) -> Option<&Blocker> {
        match &self.status {
            Status::Blocked(blocker) => Some(blocker),
            _ => None,
        }
    }

    /// Get flags
    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    /// Check if kernel thread
    pub fn is_kernel(&self) -> bool {
        self.flags.contains(ThreadFlags::KERNEL)
    }

    /// Check if this is the idle thread
    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    /// Register image the thread was created with
    pub fn entry_registers(&self) -> &R {
        &self.entry_registers
    }

    /// Kernel stack
    pub fn kernel_stack(&self) -> &Stack {
        &self.kernel_stack
    }

    /// Top of the kernel stack, loaded into the TSS when switching in
    pub fn kernel_stack_top(&self) -> VirtAddr {
        self.kernel_stack.top_address()
    }

    /// User stack
    pub fn user_stack(&self) -> Option<&Stack> {
        self.user_stack.as_ref()
    }

    /// Kernel stack pointer saved at the last switch away
    pub fn saved_sp(&self) -> usize {
        self.saved_sp
    }

    /// Exit value, once exited
    pub fn exit_value(&self) -> Option<usize> {
        self.exit_value
    }

    pub(crate) fn saved_sp_ptr(&mut self) -> *mut usize {
        &mut self.saved_sp
    }

    pub(crate) fn set_flag(&mut self, flag: ThreadFlags) {
        self.flags.insert(flag);
    }

    pub(crate) fn refill_slice(&mut self, ticks: u32) {
        self.remaining_ticks = ticks;
    }

    /// Account one tick; true once the slice is used up
    pub(crate) fn consume_tick(&mut self) -> bool {
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        self.remaining_ticks == 0
    }

    /// Check a state change against the transition table
    ///
    /// # Panics
    /// If the table forbids moving from the current state to `next`.
    fn check_transition(&self, next: ThreadState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            log::error!("{} ({}) cannot go from {:?} to {:?}", self.id, self.name, current, next);
            panic!("{} moved from {:?} to {:?}", self.id, current, next);
        }
    }

    pub(crate) fn block(&mut self, blocker: Blocker) {
        self.check_transition(blocker.blocked_state());
        self.status = Status::Blocked(blocker);
    }

    /// Detach the blocker and become Running; a thread that is not
    /// blocked is left alone
    pub(crate) fn unblock(&mut self) -> Option<Blocker> {
        if !self.state().is_blocked() {
            return None;
        }
        self.check_transition(ThreadState::Running);
        match core::mem::replace(&mut self.status, Status::Running) {
            Status::Blocked(blocker) => Some(blocker),
            other => {
                self.status = other;
                None
            }
        }
    }

    /// Become a zombie, returning any blocker that was attached
    pub(crate) fn terminate(&mut self, value: Option<usize>) -> Option<Blocker> {
        self.check_transition(ThreadState::Zombie);
        if value.is_some() {
            self.exit_value = value;
        }
        match core::mem::replace(&mut self.status, Status::Zombie) {
            Status::Blocked(blocker) => Some(blocker),
            _ => None,
        }
    }

    pub(crate) fn reap(&mut self) {
        self.check_transition(ThreadState::Dead);
        self.status = Status::Dead;
    }
}
