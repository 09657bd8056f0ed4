//! Dispatch: the ready queue, blocking, the sweep and the timer tick.

use super::Scheduler;
use crate::blocker::{Blocker, SleepBlocker, WaitBlocker};
use crate::process::ExitStatus;
use crate::time::ClockId;
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::vec::Vec;
use core::time::Duration;
use ember_hal::cpu::Processor;
use ember_hal::interrupts::InterruptGuard;

impl<P: Processor> Scheduler<P> {
    /// Append a Running thread that is not queued to the tail of the ready
    /// queue
    ///
    /// Threads become queued as they become Running, so a thread that is
    /// already queued, not Running, or idle is refused with `InvalidState`.
    pub fn queue(&mut self, id: ThreadId) -> ExecResult<()> {
        let _guard = InterruptGuard::new();
        let thread = self.threads.get(&id).ok_or(ExecError::ThreadNotFound)?;
        if !thread.state().is_runnable() || id == self.idle || self.ready.contains(id) {
            return Err(ExecError::InvalidState);
        }
        self.enqueue(id);
        Ok(())
    }

    /// Append to the ready queue
    ///
    /// # Panics
    /// If the thread is already queued.
    pub(super) fn enqueue(&mut self, id: ThreadId) {
        if self.ready.contains(id) {
            log::error!("ready queue: {:?}", self.ready);
            panic!("{} queued twice", id);
        }
        self.ready.enqueue(id);
    }

    /// Give up the processor; the caller goes to the tail of the queue
    ///
    /// With nothing else ready the caller keeps running. An idle caller
    /// hands over to the head of the queue.
    pub fn yield_now(&mut self) {
        self.metrics.record_yield();
        self.reschedule();
    }

    /// Block the running thread on `blocker` and switch away
    ///
    /// The thread becomes Blocked (Sleeping for a deadline) and leaves the
    /// ready queue. A blocker that is already satisfied is noticed by the
    /// sweep this call performs.
    ///
    /// # Panics
    /// If the running thread is already blocked, or is the idle thread.
    pub fn block(&mut self, blocker: Blocker) {
        let _guard = InterruptGuard::new();
        let id = self.current;
        assert!(id != self.idle, "idle {} cannot block", id);
        let Some(thread) = self.threads.get_mut(&id) else {
            panic!("running {} missing from the thread table", id);
        };
        log::trace!("{} blocks on {}", id, blocker.kind());
        thread.block(blocker);
        self.ready.remove(id);
        self.blocked.push(id);
        self.metrics.record_block();
        self.reschedule();
    }

    /// Sleep for `duration`, or until `duration` on `clock` when `absolute`
    pub fn sleep(&mut self, clock: ClockId, duration: Duration, absolute: bool) {
        let blocker = if absolute {
            SleepBlocker::until(clock, duration)
        } else {
            SleepBlocker::after(&self.time, clock, duration)
        };
        self.block(blocker.into());
    }

    /// Detach a thread's blocker and make it Running at the tail of the queue
    pub fn unblock(&mut self, id: ThreadId) -> ExecResult<()> {
        let _guard = InterruptGuard::new();
        let thread = self.threads.get(&id).ok_or(ExecError::ThreadNotFound)?;
        if !thread.state().is_blocked() {
            return Err(ExecError::InvalidState);
        }
        self.wake(id);
        Ok(())
    }

    pub(super) fn wake(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.get_mut(&id) else {
            return;
        };
        if let Some(blocker) = thread.unblock() {
            log::trace!("{} unblocked from {}", id, blocker.kind());
            self.blocked.retain(|&t| t != id);
            self.enqueue(id);
            self.metrics.record_wakeup();
        }
    }

    /// Unblock every blocked thread whose blocker is satisfied, in the
    /// order the threads blocked
    pub(super) fn sweep(&mut self) {
        let satisfied: Vec<ThreadId> = self
            .blocked
            .iter()
            .copied()
            .filter(|id| {
                self.threads
                    .get(id)
                    .and_then(|t| t.blocker())
                    .is_some_and(|b| b.is_satisfied(&self.time, &self.waits))
            })
            .collect();
        for id in satisfied {
            self.wake(id);
        }
    }

    /// Register `waiter` as waiting for `pid` to exit
    pub fn create_wait(&mut self, waiter: ThreadId, pid: ProcessId) -> WaitBlocker {
        let _guard = InterruptGuard::new();
        self.waits.create(waiter, pid)
    }

    /// Deliver `status` to everyone waiting for `pid` and unblock them now
    ///
    /// Returns the number of threads woken.
    pub fn try_wake_all(&mut self, pid: ProcessId, status: ExitStatus) -> usize {
        let _guard = InterruptGuard::new();
        let woken = self.waits.try_wake_all(pid, status);
        for &id in &woken {
            self.wake(id);
        }
        woken.len()
    }

    /// Timer interrupt: advance the clocks, sweep, and account the slice
    ///
    /// Never switches; a due switch is performed by
    /// [`Scheduler::preempt_if_requested`] on the way out of the interrupt.
    pub fn tick(&mut self) {
        let _guard = InterruptGuard::new();
        self.time.tick();
        let idle = self.current == self.idle;
        self.metrics.record_tick(idle);
        if !self.started {
            return;
        }
        self.sweep();
        let expired = if idle {
            !self.ready.is_empty()
        } else {
            self.threads.get_mut(&self.current).is_some_and(|t| t.consume_tick())
        };
        if expired {
            self.need_resched = true;
        }
    }

    /// Whether a tick asked for a switch that has not happened yet
    pub fn need_resched(&self) -> bool {
        self.need_resched
    }

    /// Perform the switch a tick asked for; true if one was due
    pub fn preempt_if_requested(&mut self) -> bool {
        if !self.need_resched {
            return false;
        }
        self.metrics.record_preemption();
        self.reschedule();
        true
    }

    /// Current time on `clock`
    pub fn now(&self, clock: ClockId) -> Duration {
        self.time.now(clock)
    }

    /// Ticks since boot
    pub fn ticks(&self) -> u64 {
        self.time.ticks()
    }

    /// Set the realtime clock
    pub fn set_realtime(&mut self, now: Duration) {
        self.time.set_realtime(now);
    }
}
