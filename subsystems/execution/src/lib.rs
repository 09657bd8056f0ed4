//! # Ember Execution Subsystem
//!
//! The execution core of the kernel:
//! - Thread and process representation ([`thread`], [`process`])
//! - Blockers deciding when a waiting thread may resume ([`blocker`])
//! - The round-robin [`scheduler::Scheduler`], driven by explicit yields,
//!   blocking calls and the timer tick
//! - Interrupt-safe and recursive locks ([`sync`])
//!
//! ## Key Principle
//!
//! All mutable scheduling state lives in one [`scheduler::Scheduler`] value
//! built at boot. Threads and processes refer to each other through
//! [`ThreadId`] and [`ProcessId`] handles into its tables, never through
//! pointers.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod blocker;
pub mod config;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
mod testing;

pub use blocker::{Blocker, BooleanBlocker, SleepBlocker, WaitBlocker, WaitRegistry};
pub use config::SchedulerConfig;
pub use process::{ExitStatus, Process, ProcessState};
pub use scheduler::Scheduler;
pub use thread::{Thread, ThreadState};

use core::fmt;
use ember_hal::HalError;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// The boot context, before any thread has been switched in
    pub const BOOT: Self = Self(ember_hal::percpu::BOOT_THREAD);

    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

/// Unique identifier for processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Parent id of the boot process, which has no parent
    pub const NONE: Self = Self(0);

    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Thread not found
    ThreadNotFound,
    /// Process not found
    ProcessNotFound,
    /// Invalid state
    InvalidState,
    /// No free thread or process slot
    OutOfResources,
    /// No memory for a stack or address space
    OutOfMemory,
    /// The pid is not a child of the caller
    NoChild,
    /// Invalid argument
    InvalidArgument,
    /// Internal error
    Internal,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ExecError::ThreadNotFound => "thread not found",
            ExecError::ProcessNotFound => "process not found",
            ExecError::InvalidState => "invalid state",
            ExecError::OutOfResources => "out of thread or process slots",
            ExecError::OutOfMemory => "out of memory",
            ExecError::NoChild => "no such child process",
            ExecError::InvalidArgument => "invalid argument",
            ExecError::Internal => "internal error",
        };
        f.write_str(msg)
    }
}

impl From<HalError> for ExecError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::OutOfMemory => ExecError::OutOfMemory,
            HalError::InvalidParameter | HalError::InvalidAddress => ExecError::InvalidArgument,
            HalError::NotSupported => ExecError::Internal,
        }
    }
}
