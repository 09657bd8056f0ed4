//! # Round-Robin Scheduler
//!
//! One [`Scheduler`] value owns every thread and process, the ready queue,
//! the blocked list and the wait registry. It is built at boot and driven by
//! three kinds of calls:
//!
//! - cooperative: [`Scheduler::yield_now`], [`Scheduler::block`] and the
//!   exit paths switch away immediately
//! - preemptive: the timer interrupt calls [`Scheduler::tick`], which only
//!   records that a switch is due; [`Scheduler::preempt_if_requested`] on the
//!   interrupt return path performs it
//! - lifecycle: spawning, fork, exec, kill and wait
//!
//! Every invocation first re-examines blocked threads (the sweep), so a
//! polled blocker is noticed at the latest one tick after it is satisfied.
//!
//! ## Switch protocol
//!
//! Switching from A to B pushes A's registers onto A's kernel stack and
//! records A's stack pointer, loads B's address space when it differs, points
//! the TSS at the top of B's kernel stack and pops B's registers. A thread
//! that exits keeps its kernel stack until the scheduler has switched away
//! from it.

mod dispatch;
mod lifecycle;
pub mod metrics;
pub mod queue;

pub use lifecycle::{FaultResolution, WaitOptions, WaitOutcome};
pub use metrics::{SchedulerMetrics, SchedulerStats};

use crate::blocker::{WaitId, WaitRegistry};
use crate::config::SchedulerConfig;
use crate::memory::MemoryManager;
use crate::process::Process;
use crate::thread::{Thread, ThreadEntry, ThreadFlags, ThreadSetup};
use crate::time::Timekeeper;
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use ember_hal::cpu::{Processor, RegisterState};
use ember_hal::interrupts::{self, InterruptGuard};
use ember_hal::{percpu, PhysAddr};
use queue::FifoQueue;

extern "C" fn idle_loop(_: usize) -> usize {
    loop {
        interrupts::wait_for_interrupt();
    }
}

/// The execution core's scheduling state
pub struct Scheduler<P: Processor> {
    processor: P,
    memory: Box<dyn MemoryManager>,
    config: SchedulerConfig,
    time: Timekeeper,
    threads: BTreeMap<ThreadId, Thread<P::Registers>>,
    processes: BTreeMap<ProcessId, Process>,
    ready: FifoQueue,
    /// Blocked and sleeping threads, in the order they blocked
    blocked: Vec<ThreadId>,
    waits: WaitRegistry,
    pending_waits: BTreeMap<ThreadId, WaitId>,
    current: ThreadId,
    idle: ThreadId,
    boot_process: ProcessId,
    active_space: PhysAddr,
    need_resched: bool,
    started: bool,
    next_id: u64,
    /// Exited threads whose process lives on, freed once switched away from
    graveyard: Vec<ThreadId>,
    /// Zombie processes nobody will wait for
    reap_queue: Vec<ProcessId>,
    /// Address spaces replaced by exec
    stale_spaces: Vec<PhysAddr>,
    metrics: SchedulerMetrics,
}

impl<P: Processor> fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("processor", &self.processor.name())
            .field("current", &self.current)
            .field("idle", &self.idle)
            .field("ready", &self.ready)
            .field("blocked", &self.blocked)
            .field("threads", &self.threads.len())
            .field("processes", &self.processes.len())
            .field("started", &self.started)
            .field("need_resched", &self.need_resched)
            .finish_non_exhaustive()
    }
}

impl<P: Processor> Scheduler<P> {
    /// Build the scheduler with the boot process and its idle thread
    ///
    /// The boot process is pid 1 and has no parent. Nothing runs until
    /// [`Scheduler::start`].
    pub fn new(processor: P, memory: Box<dyn MemoryManager>, config: SchedulerConfig) -> ExecResult<Self> {
        config.validate()?;
        let kernel_space = memory.kernel_address_space();
        let time = Timekeeper::new(config.tick_period, config.realtime_epoch);

        let mut scheduler = Self {
            processor,
            memory,
            config,
            time,
            threads: BTreeMap::new(),
            processes: BTreeMap::new(),
            ready: FifoQueue::new(),
            blocked: Vec::new(),
            waits: WaitRegistry::new(),
            pending_waits: BTreeMap::new(),
            current: ThreadId::BOOT,
            idle: ThreadId::BOOT,
            boot_process: ProcessId::NONE,
            active_space: PhysAddr::new(0),
            need_resched: false,
            started: false,
            next_id: 1,
            graveyard: Vec::new(),
            reap_queue: Vec::new(),
            stale_spaces: Vec::new(),
            metrics: SchedulerMetrics::new(),
        };

        let pid = ProcessId::from_raw(scheduler.allocate_id());
        scheduler
            .processes
            .insert(pid, Process::new(pid, ProcessId::NONE, "kernel", kernel_space));
        scheduler.boot_process = pid;

        let idle = ThreadId::from_raw(pid.as_u64());
        scheduler.create_thread(
            pid,
            idle,
            "idle",
            kernel_space,
            ThreadEntry::Kernel { function: idle_loop, argument: 0 },
        )?;
        if let Some(thread) = scheduler.threads.get_mut(&idle) {
            thread.set_flag(ThreadFlags::IDLE);
        }
        scheduler.idle = idle;
        scheduler.current = idle;

        log::info!(
            "scheduler: {} on {}, {}ms ticks, {}-tick slices",
            <P::Registers as RegisterState>::ARCH,
            scheduler.processor.name(),
            scheduler.config.tick_period.as_millis(),
            scheduler.config.time_slice_ticks
        );
        Ok(scheduler)
    }

    /// Enter the idle thread, leaving the boot context behind
    ///
    /// On hardware this does not return; the idle thread gives way at the
    /// first tick that finds a thread in the ready queue.
    pub fn start(&mut self) {
        assert!(!self.started, "scheduler started twice");
        let _guard = InterruptGuard::new();
        let (sp, top, space) = match self.threads.get_mut(&self.idle) {
            Some(idle) => {
                idle.refill_slice(self.config.time_slice_ticks);
                (idle.saved_sp(), idle.kernel_stack_top(), self.processes[&idle.process()].address_space())
            }
            None => panic!("idle {} missing at start", self.idle),
        };
        self.started = true;
        self.current = self.idle;
        self.processor.load_address_space(space);
        self.active_space = space;
        self.processor.set_kernel_stack(top);
        percpu::set_current_thread(self.idle.as_u64());
        log::info!("scheduler: entering idle {}", self.idle);
        // SAFETY: the idle thread's stack holds its first-entry image.
        unsafe { self.processor.start(sp) }
    }

    /// Whether [`Scheduler::start`] has run
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Thread running on the processor
    pub fn current_thread(&self) -> ThreadId {
        self.current
    }

    /// Process of the running thread
    pub fn current_process(&self) -> ProcessId {
        self.threads
            .get(&self.current)
            .map_or(self.boot_process, Thread::process)
    }

    /// The idle thread
    pub fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    /// The boot process (pid 1)
    pub fn boot_process(&self) -> ProcessId {
        self.boot_process
    }

    /// Look up a thread
    pub fn thread(&self, id: ThreadId) -> Option<&Thread<P::Registers>> {
        self.threads.get(&id)
    }

    /// Look up a process
    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id)
    }

    /// Look up a process for modification (descriptors, cwd)
    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&id)
    }

    /// Number of live threads, the idle thread included
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of processes not yet reaped
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Ready queue, head first
    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter()
    }

    /// Whether `id` is in the ready queue
    pub fn is_queued(&self, id: ThreadId) -> bool {
        self.ready.contains(id)
    }

    /// Configuration in use
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The processor
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The processor, mutably
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// The memory subsystem (for loaders building new images)
    pub fn memory_mut(&mut self) -> &mut dyn MemoryManager {
        self.memory.as_mut()
    }

    /// Live counters
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SchedulerStats {
        self.metrics.snapshot()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Build a thread in `process` and link it, without queuing it
    fn create_thread(
        &mut self,
        process: ProcessId,
        id: ThreadId,
        name: &str,
        address_space: PhysAddr,
        entry: ThreadEntry<P::Registers>,
    ) -> ExecResult<()> {
        if self.threads.len() >= self.config.max_threads {
            log::warn!("thread limit {} reached", self.config.max_threads);
            return Err(ExecError::OutOfResources);
        }
        if !self.processes.contains_key(&process) {
            return Err(ExecError::ProcessNotFound);
        }
        let kernel_stack = self.memory.allocate_kernel_stack(self.config.kernel_stack_size)?;
        let setup = ThreadSetup {
            id,
            process,
            name: String::from(name),
            address_space,
            kernel_stack,
            trampoline: self.processor.trampoline(),
            thread_return: self.processor.thread_return(),
        };
        let thread = Thread::create(setup, entry);
        log::debug!("created {} '{}' in {}", id, name, process);
        self.threads.insert(id, thread);
        if let Some(owner) = self.processes.get_mut(&process) {
            owner.add_thread(id);
        }
        Ok(())
    }

    /// Sweep, pick the next thread and switch to it
    fn reschedule(&mut self) {
        if !self.started {
            return;
        }
        let _guard = InterruptGuard::new();
        self.collect_garbage();
        self.sweep();
        let next = self.pick_next();
        self.switch_to(next);
    }

    fn pick_next(&mut self) -> ThreadId {
        let current_runs = self.current != self.idle
            && self
                .threads
                .get(&self.current)
                .is_some_and(|t| t.state().is_runnable());
        if current_runs && self.ready.peek() == Some(self.current) {
            self.ready.rotate();
        }
        self.ready.peek().unwrap_or(self.idle)
    }

    fn switch_to(&mut self, next: ThreadId) {
        self.need_resched = false;
        let slice = self.config.time_slice_ticks;
        let (to_sp, top, space) = match self.threads.get_mut(&next) {
            Some(thread) => {
                thread.refill_slice(slice);
                (thread.saved_sp(), thread.kernel_stack_top(), self.processes[&thread.process()].address_space())
            }
            None => panic!("switch to missing {}", next),
        };
        let prev = self.current;
        if prev == next {
            return;
        }

        if space != self.active_space {
            self.processor.load_address_space(space);
            self.active_space = space;
        }
        self.processor.set_kernel_stack(top);
        percpu::set_current_thread(next.as_u64());
        self.current = next;
        self.metrics.record_context_switch();
        log::trace!("switch {} -> {}", prev, next);

        let mut discarded = 0usize;
        let from_sp = match self.threads.get_mut(&prev) {
            Some(thread) => thread.saved_sp_ptr(),
            None => &mut discarded as *mut usize,
        };
        // SAFETY: interrupts are off; `to_sp` was produced by a switch or a
        // first-entry image on a stack owned by a live thread, and `from_sp`
        // points into the thread table, which is not touched during the call.
        unsafe { self.processor.switch_context(from_sp, to_sp) }
    }

    /// Free what exited threads left behind, now that none of it is running
    fn collect_garbage(&mut self) {
        let current = self.current;
        let current_process = self.current_process();

        let (done, keep): (Vec<ThreadId>, Vec<ThreadId>) =
            self.graveyard.drain(..).partition(|&t| t != current);
        self.graveyard = keep;
        for id in done {
            self.release_thread(id);
        }

        let (done, keep): (Vec<ProcessId>, Vec<ProcessId>) =
            self.reap_queue.drain(..).partition(|&p| p != current_process);
        self.reap_queue = keep;
        for pid in done {
            if self.processes.get(&pid).is_some_and(Process::is_exited) {
                self.reap_process(pid);
            }
        }

        let active = self.active_space;
        let (done, keep): (Vec<PhysAddr>, Vec<PhysAddr>) =
            self.stale_spaces.drain(..).partition(|&s| s != active);
        self.stale_spaces = keep;
        for space in done {
            self.memory.release_address_space(space);
        }
    }

    /// Move an exited thread to Dead and drop it with its stacks
    fn release_thread(&mut self, id: ThreadId) {
        if let Some(mut thread) = self.threads.remove(&id) {
            thread.reap();
            if let Some(process) = self.processes.get_mut(&thread.process()) {
                process.remove_thread(id);
            }
            log::trace!("released {}", id);
        }
    }

    /// Verify the scheduling invariants, panicking on the first violation
    ///
    /// - a thread has a blocker exactly when it is Blocked or Sleeping
    /// - a thread is in the ready queue exactly when it is Running, except
    ///   the idle thread, which is never queued
    /// - the running thread, unless idle, is at the head of the ready queue
    /// - threads and processes point at each other
    pub fn check_invariants(&self) {
        for (&id, thread) in &self.threads {
            let state = thread.state();
            assert_eq!(
                state.is_blocked(),
                thread.blocker().is_some(),
                "{} is {:?} with blocker {:?}",
                id,
                state,
                thread.blocker()
            );
            assert_eq!(
                state.is_blocked(),
                self.blocked.contains(&id),
                "{} is {:?} but blocked-list membership disagrees",
                id,
                state
            );
            if id == self.idle {
                assert!(!self.ready.contains(id), "idle {} is queued", id);
                assert!(state.is_runnable(), "idle {} is {:?}", id, state);
            } else {
                assert_eq!(
                    state.is_runnable(),
                    self.ready.contains(id),
                    "{} is {:?} but ready-queue membership disagrees",
                    id,
                    state
                );
            }
            let owner = self
                .processes
                .get(&thread.process())
                .unwrap_or_else(|| panic!("{} belongs to missing {}", id, thread.process()));
            assert!(owner.threads().contains(&id), "{} not listed by {}", id, owner.id());
        }

        if self.started && self.current != self.idle {
            if let Some(current) = self.threads.get(&self.current) {
                if current.state().is_runnable() {
                    assert_eq!(self.ready.peek(), Some(self.current), "running {} not at queue head", self.current);
                }
            }
        }

        for (&pid, process) in &self.processes {
            for id in process.threads() {
                let thread = self
                    .threads
                    .get(id)
                    .unwrap_or_else(|| panic!("{} lists missing {}", pid, id));
                assert_eq!(thread.process(), pid, "{} listed by {} belongs to {}", id, pid, thread.process());
            }
            for child in process.children() {
                let parent = self.processes.get(child).map(Process::parent);
                assert_eq!(parent, Some(pid), "{} lists {} whose parent is {:?}", pid, child, parent);
            }
            if pid != self.boot_process {
                assert!(self.processes.contains_key(&process.parent()), "{} has missing parent {}", pid, process.parent());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, spawn, started, KERNEL_SPACE};
    use crate::ThreadState;

    #[test]
    fn test_boot_process_and_idle() {
        let (scheduler, _) = testing::scheduler_with(SchedulerConfig::simple());
        let boot = scheduler.process(scheduler.boot_process()).unwrap();
        assert_eq!(boot.id(), ProcessId::from_raw(1));
        assert_eq!(boot.parent(), ProcessId::NONE);
        assert_eq!(scheduler.idle_thread(), ThreadId::from_raw(1));
        assert_eq!(boot.main_thread(), Some(scheduler.idle_thread()));
        assert!(scheduler.thread(scheduler.idle_thread()).unwrap().is_idle());
        assert_eq!(scheduler.ready_threads().count(), 0);
        scheduler.check_invariants();
    }

    #[test]
    fn test_debug_summarizes_tables() {
        let (mut scheduler, _) = started();
        spawn(&mut scheduler, "a");
        let text = alloc::format!("{:?}", scheduler);
        assert!(text.starts_with("Scheduler {"));
        assert!(text.contains("processor: \"simulated\""));
        assert!(text.contains("threads: 2"));
        assert!(text.contains("started: true"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (memory, _) = testing::FakeMemory::new();
        let config = SchedulerConfig::simple().with_time_slice(0);
        let result = Scheduler::new(ember_hal::sim::SimulatedProcessor::<testing::TestRegisters>::new(), Box::new(memory), config);
        assert_eq!(result.err(), Some(ExecError::InvalidArgument));
    }

    #[test]
    fn test_start_enters_idle() {
        let (scheduler, _) = started();
        let cpu = scheduler.processor();
        let idle = scheduler.thread(scheduler.idle_thread()).unwrap();
        assert_eq!(cpu.entries().len(), 1);
        assert_eq!(cpu.registers().instruction_pointer().as_u64(), idle_loop as *const () as usize as u64);
        assert_eq!(cpu.address_space(), KERNEL_SPACE);
        assert_eq!(cpu.kernel_stack(), idle.kernel_stack_top());
        assert_eq!(percpu::current_thread(), scheduler.idle_thread().as_u64());
        assert_eq!(scheduler.current_process(), scheduler.boot_process());
    }

    #[test]
    fn test_yield_before_start_does_nothing() {
        let (mut scheduler, _) = testing::scheduler_with(SchedulerConfig::simple());
        let worker = spawn(&mut scheduler, "early");
        scheduler.yield_now();
        assert_eq!(scheduler.current_thread(), scheduler.idle_thread());
        assert!(scheduler.is_queued(worker));
    }

    #[test]
    fn test_switch_loads_tss_and_current_thread() {
        let (mut scheduler, _) = started();
        let a = spawn(&mut scheduler, "a");
        scheduler.yield_now();
        assert_eq!(scheduler.current_thread(), a);
        let thread = scheduler.thread(a).unwrap();
        assert_eq!(scheduler.processor().kernel_stack(), thread.kernel_stack_top());
        assert_eq!(percpu::current_thread(), a.as_u64());
        assert_eq!(scheduler.processor().registers().argument(), 0);
        // Both threads share the kernel address space.
        assert_eq!(scheduler.processor().address_space_loads(), 1);
        assert_eq!(scheduler.stats().context_switches, 1);
        scheduler.check_invariants();
    }

    #[test]
    fn test_thread_limit() {
        let (mut scheduler, _) = testing::scheduler_with(SchedulerConfig::simple().with_limits(3, 8));
        spawn(&mut scheduler, "a");
        spawn(&mut scheduler, "b");
        let result = scheduler.spawn_kernel_thread("c", testing::returns_argument, 0);
        assert_eq!(result, Err(ExecError::OutOfResources));
        assert_eq!(scheduler.thread_count(), 3);
        scheduler.check_invariants();
    }

    #[test]
    fn test_exited_thread_stack_freed_after_switch_away() {
        let (mut scheduler, _) = started();
        let a = spawn(&mut scheduler, "a");
        let b = spawn(&mut scheduler, "b");
        testing::run(&mut scheduler, a);
        scheduler.exit_thread(5);
        assert_eq!(scheduler.current_thread(), b);
        // Still present: released at the next scheduler invocation.
        assert_eq!(scheduler.thread(a).map(Thread::state), Some(ThreadState::Zombie));
        assert_eq!(scheduler.thread(a).and_then(Thread::exit_value), Some(5));
        scheduler.yield_now();
        assert!(scheduler.thread(a).is_none());
        scheduler.check_invariants();
    }
}
