//! # Process Arguments
//!
//! Initial user stack of a program's first thread, from the top down:
//!
//! ```text
//! argument and environment strings (NUL-terminated)
//! padding to 16 bytes
//! 0, argv[n-1] .. argv[0]          <- argv
//! 0, envp[m-1] .. envp[0]          <- envp
//! envp
//! argv
//! argc
//! 0xDEADCAFE                       <- stack pointer (return address of _start)
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use ember_hal::cpu::RegisterState;
use ember_hal::stack::{Stack, STACK_ALIGN};

/// Return address planted below `argc`; `_start` must never return
pub const START_RETURN_POISON: u64 = 0xDEAD_CAFE;

/// Argument and environment vectors of a new program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessArguments {
    /// Argument vector, `argv[0]` first
    pub argv: Vec<String>,
    /// Environment, `KEY=value` entries
    pub envp: Vec<String>,
}

impl ProcessArguments {
    /// Arguments with an empty environment
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            envp: Vec::new(),
        }
    }

    /// Add an environment entry
    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.envp.push(entry.into());
        self
    }

    /// Lay the package out on `stack`, returning the initial stack pointer
    pub fn push_onto<R: RegisterState>(&self, stack: &mut Stack) -> usize {
        let argv: Vec<usize> = self.argv.iter().map(|s| stack.push_str(s)).collect();
        let envp: Vec<usize> = self.envp.iter().map(|s| stack.push_str(s)).collect();
        stack.align_down(STACK_ALIGN);

        let argv_address = Self::push_vector::<R>(stack, &argv);
        let envp_address = Self::push_vector::<R>(stack, &envp);

        R::push_word(stack, envp_address as u64);
        R::push_word(stack, argv_address as u64);
        R::push_word(stack, self.argv.len() as u64);
        R::push_word(stack, START_RETURN_POISON);
        stack.value()
    }

    fn push_vector<R: RegisterState>(stack: &mut Stack, pointers: &[usize]) -> usize {
        R::push_word(stack, 0);
        for &pointer in pointers.iter().rev() {
            R::push_word(stack, pointer as u64);
        }
        stack.value()
    }
}
