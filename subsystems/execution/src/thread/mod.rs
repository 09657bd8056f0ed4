//! # Thread Management
//!
//! Thread creation, lifecycle, and management.

mod args;
pub mod states;
#[allow(clippy::module_inception)]
pub mod thread;

pub use args::{ProcessArguments, START_RETURN_POISON};
pub use states::ThreadState;
pub use thread::{KernelEntry, Thread, ThreadEntry, ThreadFlags, ThreadSetup};
