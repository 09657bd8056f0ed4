//! # Blockers
//!
//! A blocked thread carries a [`Blocker`]: a predicate that says when it may
//! run again. Predicates are pure; evaluating one never changes state, so
//! the scheduler can ask from any context, including the timer interrupt.
//!
//! Two wake disciplines exist:
//!
//! - polled: the scheduler's sweep asks [`Blocker::is_satisfied`] on every
//!   invocation (boolean flags, sleep deadlines)
//! - pushed: the event source marks waiters ready and the scheduler unblocks
//!   them at once ([`WaitRegistry::try_wake_all`] on process exit)

use crate::process::ExitStatus;
use crate::thread::ThreadState;
use crate::time::{ClockId, Timekeeper};
use crate::{ProcessId, ThreadId};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

/// Why a thread is not running, and when it may
#[derive(Debug, Clone)]
pub enum Blocker {
    /// Externally flipped flag
    Boolean(BooleanBlocker),
    /// Absolute deadline on a clock
    Sleep(SleepBlocker),
    /// Exit of a child process
    Wait(WaitBlocker),
}

impl Blocker {
    /// Whether the blocked thread may run again
    pub fn is_satisfied(&self, now: &Timekeeper, registry: &WaitRegistry) -> bool {
        match self {
            Blocker::Boolean(b) => b.should_unblock(),
            Blocker::Sleep(s) => s.should_unblock(now),
            Blocker::Wait(w) => w.should_unblock(registry),
        }
    }

    /// State a thread takes while blocked on this
    pub fn blocked_state(&self) -> ThreadState {
        match self {
            Blocker::Sleep(_) => ThreadState::Sleeping,
            Blocker::Boolean(_) | Blocker::Wait(_) => ThreadState::Blocked,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Blocker::Boolean(_) => "boolean",
            Blocker::Sleep(_) => "sleep",
            Blocker::Wait(_) => "wait",
        }
    }
}

impl From<BooleanBlocker> for Blocker {
    fn from(b: BooleanBlocker) -> Self {
        Blocker::Boolean(b)
    }
}

impl From<SleepBlocker> for Blocker {
    fn from(s: SleepBlocker) -> Self {
        Blocker::Sleep(s)
    }
}

impl From<WaitBlocker> for Blocker {
    fn from(w: WaitBlocker) -> Self {
        Blocker::Wait(w)
    }
}

/// Flag shared between a blocked thread and whoever will release it
///
/// Clones observe the same flag, so an interrupt handler keeps one and the
/// blocking thread hands the other to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct BooleanBlocker {
    flag: Arc<AtomicBool>,
}

impl BooleanBlocker {
    /// Unset flag
    pub fn new() -> Self {
        Self::with_value(false)
    }

    /// Flag with an initial value
    pub fn with_value(value: bool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(value)),
        }
    }

    /// Release the waiter at the next sweep
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Reset the flag
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Current value
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Satisfied once the flag is set
    pub fn should_unblock(&self) -> bool {
        self.is_set()
    }
}

/// Deadline on a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepBlocker {
    deadline: Duration,
    clock: ClockId,
}

impl SleepBlocker {
    /// Sleep until the absolute time `deadline` on `clock`
    pub fn until(clock: ClockId, deadline: Duration) -> Self {
        Self { deadline, clock }
    }

    /// Sleep for `duration` from the current time on `clock`
    pub fn after(now: &Timekeeper, clock: ClockId, duration: Duration) -> Self {
        Self::until(clock, now.now(clock).saturating_add(duration))
    }

    /// Absolute deadline
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Clock the deadline is measured on
    pub fn clock(&self) -> ClockId {
        self.clock
    }

    /// Satisfied once the clock reaches the deadline
    pub fn should_unblock(&self, now: &Timekeeper) -> bool {
        now.now(self.clock) >= self.deadline
    }
}

/// Key of a live wait in the [`WaitRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitId(u64);

/// Wait for a child process to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBlocker {
    id: WaitId,
    pid: ProcessId,
}

impl WaitBlocker {
    /// Registry key
    pub fn id(&self) -> WaitId {
        self.id
    }

    /// Process being waited for
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Satisfied once the exit path has delivered a status
    pub fn should_unblock(&self, registry: &WaitRegistry) -> bool {
        registry.is_ready(self.id)
    }
}

#[derive(Debug)]
struct WaitEntry {
    waiter: ThreadId,
    pid: ProcessId,
    status: Option<ExitStatus>,
}

/// Live wait blockers, looked up by the pid they wait for
#[derive(Debug, Default)]
pub struct WaitRegistry {
    entries: BTreeMap<WaitId, WaitEntry>,
    next_id: u64,
}

impl WaitRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `waiter` as waiting for `pid`
    pub fn create(&mut self, waiter: ThreadId, pid: ProcessId) -> WaitBlocker {
        let id = WaitId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, WaitEntry { waiter, pid, status: None });
        WaitBlocker { id, pid }
    }

    /// Deliver `status` to every pending waiter on `pid`
    ///
    /// Returns the waiting threads, in registration order.
    pub fn try_wake_all(&mut self, pid: ProcessId, status: ExitStatus) -> Vec<ThreadId> {
        self.entries
            .values_mut()
            .filter(|e| e.pid == pid && e.status.is_none())
            .map(|e| {
                e.status = Some(status);
                e.waiter
            })
            .collect()
    }

    /// Whether a status has been delivered for `id`
    pub fn is_ready(&self, id: WaitId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.status.is_some())
    }

    /// Remove a delivered wait, returning its result
    pub fn take(&mut self, id: WaitId) -> Option<(ProcessId, ExitStatus)> {
        let status = self.entries.get(&id)?.status?;
        let entry = self.entries.remove(&id)?;
        Some((entry.pid, status))
    }

    /// Drop a wait whether or not it was delivered
    pub fn cancel(&mut self, id: WaitId) {
        self.entries.remove(&id);
    }

    /// Drop every wait registered by `thread`
    pub fn cancel_for(&mut self, thread: ThreadId) {
        self.entries.retain(|_, e| e.waiter != thread);
    }

    /// Number of live waits
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no wait is live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
