//! # Thread States
//!
//! Thread state machine definition.
//!
//! ```text
//! Running --block--> Blocked | Sleeping --unblock--> Running
//! Running | Blocked | Sleeping --exit/kill--> Zombie --reap--> Dead
//! ```
//!
//! A Running thread is either executing or waiting in the ready queue.

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Executing or ready to execute
    Running,
    /// Waiting for an event
    Blocked,
    /// Waiting for a deadline
    Sleeping,
    /// Finished, not yet reaped
    Zombie,
    /// Reaped
    Dead,
}

impl ThreadState {
    /// Check if thread can be scheduled
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Running)
    }

    /// Check if thread is blocked
    pub fn is_blocked(&self) -> bool {
        matches!(self, ThreadState::Blocked | ThreadState::Sleeping)
    }

    /// Check if thread is terminated
    pub fn is_terminated(&self) -> bool {
        matches!(self, ThreadState::Dead | ThreadState::Zombie)
    }

    /// Valid transitions from this state, enforced by every state change
    /// on a thread
    pub fn valid_transitions(&self) -> &'static [ThreadState] {
        match self {
            ThreadState::Running => &[ThreadState::Blocked, ThreadState::Sleeping, ThreadState::Zombie],
            ThreadState::Blocked | ThreadState::Sleeping => &[ThreadState::Running, ThreadState::Zombie],
            ThreadState::Zombie => &[ThreadState::Dead],
            ThreadState::Dead => &[],
        }
    }

    /// Whether moving to `next` is allowed
    pub fn can_transition_to(&self, next: ThreadState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState::Running
    }
}
