//! Lifecycle: spawning, fork, exec, exit, kill, wait and page faults.

use super::Scheduler;
use crate::memory::{FaultAccess, UserImage};
use crate::process::{ExitStatus, Process, ProcessState, SIGKILL, SIGSEGV};
use crate::thread::{KernelEntry, ProcessArguments, ThreadEntry};
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use ember_hal::cpu::{Privilege, Processor, RegisterState};
use ember_hal::interrupts::InterruptGuard;
use ember_hal::VirtAddr;

bitflags! {
    /// waitpid options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        /// Return at once if the child is still running
        const NOHANG = 1 << 0;
    }
}

/// Result of [`Scheduler::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child had exited and has been reaped
    Reaped(ProcessId, ExitStatus),
    /// `NOHANG` was given and the child is still running
    StillRunning,
    /// The caller blocked; collect with [`Scheduler::take_wait_result`]
    Blocked,
}

/// What a page fault came to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// Mapped; the faulting instruction can be retried
    Resolved,
    /// The faulting process was killed with `SIGSEGV`
    Killed,
}

impl<P: Processor> Scheduler<P> {
    /// Start a kernel thread in the boot process and queue it
    pub fn spawn_kernel_thread(&mut self, name: &str, function: KernelEntry, argument: usize) -> ExecResult<ThreadId> {
        let _guard = InterruptGuard::new();
        let id = ThreadId::from_raw(self.allocate_id());
        let space = self.processes[&self.boot_process].address_space();
        self.create_thread(self.boot_process, id, name, space, ThreadEntry::Kernel { function, argument })?;
        self.enqueue(id);
        Ok(id)
    }

    /// Start a loaded program as a child of the running process
    ///
    /// Its main thread enters `image.entry` with `arguments` on a fresh
    /// user stack and shares its id with the new process.
    pub fn spawn_process(&mut self, name: &str, image: UserImage, arguments: ProcessArguments) -> ExecResult<ProcessId> {
        let _guard = InterruptGuard::new();
        if self.processes.len() >= self.config.max_processes {
            log::warn!("process limit {} reached", self.config.max_processes);
            return Err(ExecError::OutOfResources);
        }
        let parent = self.current_process();
        let stack = self
            .memory
            .allocate_user_stack(image.address_space, self.config.user_stack_size)?;

        let pid = ProcessId::from_raw(self.allocate_id());
        self.processes
            .insert(pid, Process::new(pid, parent, name, image.address_space));
        let main = ThreadId::from_raw(pid.as_u64());
        let entry = ThreadEntry::User { entry: image.entry, stack, arguments };
        if let Err(err) = self.create_thread(pid, main, name, image.address_space, entry) {
            self.processes.remove(&pid);
            return Err(err);
        }
        if let Some(parent) = self.processes.get_mut(&parent) {
            parent.add_child(pid);
        }
        self.enqueue(main);
        log::info!("started {} '{}' (parent {})", pid, name, parent);
        Ok(pid)
    }

    /// Duplicate the running process
    ///
    /// `registers` are the caller's registers at syscall entry. The child
    /// resumes from them with a return value of 0 in a copy of the address
    /// space, with the same descriptors, cwd and name. Returns the child pid.
    pub fn fork(&mut self, registers: &P::Registers) -> ExecResult<ProcessId> {
        let _guard = InterruptGuard::new();
        if registers.privilege() != Privilege::User {
            return Err(ExecError::InvalidArgument);
        }
        let parent_pid = self.current_process();
        if parent_pid == self.boot_process {
            return Err(ExecError::InvalidState);
        }
        if self.processes.len() >= self.config.max_processes || self.threads.len() >= self.config.max_threads {
            return Err(ExecError::OutOfResources);
        }
        let parent_space = self
            .processes
            .get(&parent_pid)
            .ok_or(ExecError::ProcessNotFound)?
            .address_space();
        let space = self.memory.clone_address_space(parent_space)?;

        let pid = ProcessId::from_raw(self.allocate_id());
        let child = self.processes[&parent_pid].fork(pid, space);
        let name = String::from(child.name());
        self.processes.insert(pid, child);

        let main = ThreadId::from_raw(pid.as_u64());
        if let Err(err) = self.create_thread(pid, main, &name, space, ThreadEntry::Fork { registers: *registers }) {
            self.processes.remove(&pid);
            self.memory.release_address_space(space);
            return Err(err);
        }
        if let Some(parent) = self.processes.get_mut(&parent_pid) {
            parent.add_child(pid);
        }
        self.enqueue(main);
        self.metrics.record_fork();
        log::debug!("{} forked {}", parent_pid, pid);
        Ok(pid)
    }

    /// Replace the running process's program
    ///
    /// The pid, parent, descriptors and cwd survive. Every old thread is
    /// killed, a new main thread enters `image`, and the old address space
    /// is released once the processor has left it.
    pub fn exec(&mut self, name: &str, image: UserImage, arguments: ProcessArguments) -> ExecResult<ThreadId> {
        let _guard = InterruptGuard::new();
        let pid = self.current_process();
        if pid == self.boot_process {
            return Err(ExecError::InvalidState);
        }
        let stack = self
            .memory
            .allocate_user_stack(image.address_space, self.config.user_stack_size)?;
        let main = ThreadId::from_raw(self.allocate_id());
        let entry = ThreadEntry::User { entry: image.entry, stack, arguments };
        self.create_thread(pid, main, name, image.address_space, entry)?;

        let old: Vec<ThreadId> = self.processes[&pid]
            .threads()
            .iter()
            .copied()
            .filter(|&t| t != main)
            .collect();
        for id in old {
            if self.threads.get(&id).is_some_and(|t| !t.state().is_terminated()) {
                self.detach_thread(id, None);
                self.graveyard.push(id);
            }
        }
        if let Some(process) = self.processes.get_mut(&pid) {
            let old_space = process.replace_image(name, image.address_space, main);
            self.stale_spaces.push(old_space);
        }
        self.enqueue(main);
        log::debug!("{} exec '{}' as {}", pid, name, main);
        self.reschedule();
        Ok(main)
    }

    /// End the running thread with `value`
    ///
    /// The last live thread of a process takes the process with it, exiting
    /// with `value` as its code.
    pub fn exit_thread(&mut self, value: usize) {
        let _guard = InterruptGuard::new();
        let id = self.current;
        assert!(id != self.idle, "idle {} cannot exit", id);
        let pid = self.current_process();
        let last = !self.has_other_live_thread(pid, id);
        self.detach_thread(id, Some(value));
        if last {
            if let Err(err) = self.terminate_process(pid, ExitStatus::exited(value as i32)) {
                log::error!("exit of {} failed: {}", pid, err);
            }
        } else {
            log::debug!("{} exited with {:#x}", id, value);
            self.graveyard.push(id);
        }
        self.reschedule();
    }

    /// End the running process with `status`
    pub fn exit_process(&mut self, status: ExitStatus) {
        let _guard = InterruptGuard::new();
        let pid = self.current_process();
        if let Err(err) = self.terminate_process(pid, status) {
            log::error!("exit of {} failed: {}", pid, err);
        }
        self.reschedule();
    }

    /// Force a thread to Zombie, whatever it was doing
    ///
    /// Killing the last live thread of a process kills the process with
    /// `SIGKILL`.
    pub fn kill(&mut self, id: ThreadId) -> ExecResult<()> {
        let _guard = InterruptGuard::new();
        let thread = self.threads.get(&id).ok_or(ExecError::ThreadNotFound)?;
        if id == self.idle {
            return Err(ExecError::InvalidArgument);
        }
        if thread.state().is_terminated() {
            return Err(ExecError::InvalidState);
        }
        let pid = thread.process();
        if self.has_other_live_thread(pid, id) {
            self.detach_thread(id, None);
            self.graveyard.push(id);
        } else {
            self.terminate_process(pid, ExitStatus::killed(SIGKILL))?;
        }
        log::debug!("killed {}", id);
        if id == self.current {
            self.reschedule();
        }
        Ok(())
    }

    /// Kill every thread of a process and exit it with `signal`
    pub fn kill_process(&mut self, pid: ProcessId, signal: i32) -> ExecResult<()> {
        let _guard = InterruptGuard::new();
        self.terminate_process(pid, ExitStatus::killed(signal))?;
        if self.current_process() == pid {
            self.reschedule();
        }
        Ok(())
    }

    /// Wait for a child of the running process to exit
    ///
    /// An exited child is reaped at once. Otherwise the caller blocks until
    /// the child's exit wakes it, unless `NOHANG` is given.
    pub fn wait(&mut self, pid: ProcessId, options: WaitOptions) -> ExecResult<WaitOutcome> {
        let _guard = InterruptGuard::new();
        let caller = self.current_process();
        let is_child = self.processes.get(&caller).is_some_and(|p| p.has_child(pid));
        let child = self.processes.get(&pid).filter(|_| is_child).ok_or(ExecError::NoChild)?;

        if child.is_exited() {
            let status = self.reap_process(pid);
            return Ok(WaitOutcome::Reaped(pid, status));
        }
        if options.contains(WaitOptions::NOHANG) {
            return Ok(WaitOutcome::StillRunning);
        }
        let waiter = self.current;
        let blocker = self.create_wait(waiter, pid);
        if let Some(stale) = self.pending_waits.insert(waiter, blocker.id()) {
            // An earlier wait that was never collected.
            self.waits.cancel(stale);
        }
        self.block(blocker.into());
        Ok(WaitOutcome::Blocked)
    }

    /// Collect the result of the running thread's completed wait, reaping
    /// the child
    pub fn take_wait_result(&mut self) -> Option<(ProcessId, ExitStatus)> {
        let _guard = InterruptGuard::new();
        let waiter = self.current;
        let wait = *self.pending_waits.get(&waiter)?;
        let (pid, status) = self.waits.take(wait)?;
        self.pending_waits.remove(&waiter);
        if self.processes.get(&pid).is_some_and(|p| p.state() == ProcessState::Zombie) {
            self.reap_process(pid);
        }
        Some((pid, status))
    }

    /// Let the memory subsystem resolve a fault in the running process
    ///
    /// # Panics
    /// If the fault cannot be resolved and the running process is the
    /// kernel.
    pub fn handle_page_fault(&mut self, address: VirtAddr, access: FaultAccess) -> FaultResolution {
        let _guard = InterruptGuard::new();
        let pid = self.current_process();
        let space = self
            .processes
            .get(&pid)
            .map_or(self.active_space, Process::address_space);
        let err = match self.memory.handle_page_fault(space, address, access) {
            Ok(()) => return FaultResolution::Resolved,
            Err(err) => err,
        };

        if pid == self.boot_process {
            log::error!("{} in kernel: {:?} at {:#x}: {}", self.current, access, address, err);
            panic!("unresolved kernel page fault at {:#x}", address);
        }
        log::warn!("{} killed: {:?} fault at {:#x}", pid, access, address);
        if let Err(err) = self.terminate_process(pid, ExitStatus::killed(SIGSEGV)) {
            log::error!("kill of {} failed: {}", pid, err);
        }
        self.reschedule();
        FaultResolution::Killed
    }

    /// Change the running process's working directory
    pub fn chdir(&mut self, path: &str) -> ExecResult<()> {
        let pid = self.current_process();
        self.processes
            .get_mut(&pid)
            .ok_or(ExecError::ProcessNotFound)?
            .chdir(path)
    }

    /// Working directory of the running process
    pub fn cwd(&self) -> &str {
        self.processes
            .get(&self.current_process())
            .map_or("/", Process::cwd)
    }

    fn has_other_live_thread(&self, pid: ProcessId, id: ThreadId) -> bool {
        self.processes.get(&pid).is_some_and(|p| {
            p.threads().iter().any(|&t| {
                t != id && self.threads.get(&t).is_some_and(|t| !t.state().is_terminated())
            })
        })
    }

    /// Make a thread a zombie and drop every scheduling reference to it
    fn detach_thread(&mut self, id: ThreadId, value: Option<usize>) {
        if let Some(thread) = self.threads.get_mut(&id) {
            if let Some(blocker) = thread.terminate(value) {
                log::trace!("{} dropped its {} blocker", id, blocker.kind());
            }
        }
        self.ready.remove(id);
        self.blocked.retain(|&t| t != id);
        self.waits.cancel_for(id);
        self.pending_waits.remove(&id);
    }

    /// Kill what is left of a process and make it a zombie
    fn terminate_process(&mut self, pid: ProcessId, status: ExitStatus) -> ExecResult<()> {
        if pid == self.boot_process {
            log::error!("boot process asked to exit with {:?}", status);
            panic!("{} (boot process) cannot exit", pid);
        }
        let process = self.processes.get(&pid).ok_or(ExecError::ProcessNotFound)?;
        if process.is_exited() {
            return Err(ExecError::InvalidState);
        }
        let threads: Vec<ThreadId> = process.threads().to_vec();
        for id in threads {
            if self.threads.get(&id).is_some_and(|t| !t.state().is_terminated()) {
                self.detach_thread(id, None);
            }
        }

        let (parent, orphans) = match self.processes.get_mut(&pid) {
            Some(process) => {
                process.mark_zombie(status);
                (process.parent(), process.take_children())
            }
            None => return Err(ExecError::ProcessNotFound),
        };
        self.metrics.record_exit();
        log::info!("{} exited ({:?})", pid, status);

        for child in orphans {
            self.adopt(child);
        }
        let woken = self.try_wake_all(pid, status);
        if woken == 0 && parent == self.boot_process {
            self.reap_queue.push(pid);
        }
        Ok(())
    }

    /// Reparent an orphan to the boot process, reaping it if already exited
    fn adopt(&mut self, orphan: ProcessId) {
        let boot = self.boot_process;
        let exited = match self.processes.get_mut(&orphan) {
            Some(process) => {
                process.set_parent(boot);
                process.is_exited()
            }
            None => return,
        };
        if let Some(boot) = self.processes.get_mut(&boot) {
            boot.add_child(orphan);
        }
        if exited {
            self.reap_process(orphan);
        } else {
            log::debug!("{} adopted by {}", orphan, boot);
        }
    }

    /// Zombie to Dead: free the threads and address space, unlink the process
    pub(super) fn reap_process(&mut self, pid: ProcessId) -> ExitStatus {
        let Some(process) = self.processes.get_mut(&pid) else {
            panic!("reap of missing {}", pid);
        };
        process.mark_dead();
        let status = process.exit_status().unwrap_or(ExitStatus::exited(0));
        let threads = process.threads().to_vec();
        let parent = process.parent();
        let space = process.address_space();

        for id in threads {
            debug_assert!(id != self.current, "reaping the running {}", id);
            self.graveyard.retain(|&t| t != id);
            if let Some(mut thread) = self.threads.remove(&id) {
                thread.reap();
            }
        }
        self.memory.release_address_space(space);
        if let Some(parent) = self.processes.get_mut(&parent) {
            parent.remove_child(pid);
        }
        self.processes.remove(&pid);
        log::debug!("reaped {} ({:?})", pid, status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::BooleanBlocker;
    use crate::config::SchedulerConfig;
    use crate::testing::{self, run, spawn, spawn_user, started, NamedFile, TestScheduler};
    use crate::ThreadState;

    /// Run the main thread of `pid` and return it
    fn run_main(scheduler: &mut TestScheduler, pid: ProcessId) -> ThreadId {
        let main = scheduler.process(pid).unwrap().main_thread().unwrap();
        run(scheduler, main);
        main
    }

    /// Fork from the running user thread, as its syscall would
    fn fork_current(scheduler: &mut TestScheduler) -> ProcessId {
        let registers = *scheduler.processor().registers();
        scheduler.fork(&registers).unwrap()
    }

    #[test]
    fn test_spawn_process_links_parent() {
        let (mut scheduler, _) = started();
        let pid = spawn_user(&mut scheduler, "init");
        let process = scheduler.process(pid).unwrap();
        assert_eq!(process.parent(), scheduler.boot_process());
        assert_eq!(process.main_thread(), Some(ThreadId::from_raw(pid.as_u64())));
        assert!(scheduler.process(scheduler.boot_process()).unwrap().has_child(pid));
        let main = scheduler.thread(ThreadId::from_raw(pid.as_u64())).unwrap();
        assert!(main.user_stack().is_some());
        assert_eq!(main.entry_registers().rsp as usize, main.user_stack().unwrap().value());
        scheduler.check_invariants();
    }

    #[test]
    fn test_process_limit() {
        let (mut scheduler, _) = testing::scheduler_with(SchedulerConfig::simple().with_limits(16, 2));
        spawn_user(&mut scheduler, "a");
        let space = scheduler.memory_mut().create_address_space().unwrap();
        let image = UserImage { entry: VirtAddr::new(0x40_0000), address_space: space };
        let result = scheduler.spawn_process("b", image, ProcessArguments::default());
        assert_eq!(result, Err(ExecError::OutOfResources));
    }

    #[test]
    fn test_fork_copies_process_and_returns_zero_in_child() {
        let (mut scheduler, log) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, parent);
        scheduler
            .process_mut(parent)
            .unwrap()
            .files_mut()
            .insert(NamedFile::open("/dev/tty"))
            .unwrap();
        scheduler.chdir("/tmp").unwrap();
        scheduler.processor_mut().registers_mut().rax = 57;
        scheduler.processor_mut().registers_mut().rbx = 0x1234;
        let parent_rip = scheduler.processor().registers().rip;

        let child = fork_current(&mut scheduler);
        let process = scheduler.process(child).unwrap();
        assert_eq!(process.parent(), parent);
        assert_eq!(process.name(), "sh");
        assert_eq!(process.cwd(), "/tmp");
        assert_eq!(process.files().get(0).map(|f| f.path()), Some("/dev/tty"));
        let parent_space = scheduler.process(parent).unwrap().address_space();
        assert_eq!(log.lock().unwrap().cloned, [(parent_space, process.address_space())]);
        assert_eq!(scheduler.stats().forks, 1);

        run_main(&mut scheduler, child);
        let regs = scheduler.processor().registers();
        assert_eq!(regs.rax, 0);
        assert_eq!(regs.rbx, 0x1234);
        assert_eq!(regs.rip, parent_rip);
        assert_eq!(scheduler.processor().address_space(), scheduler.process(child).unwrap().address_space());
        scheduler.check_invariants();
    }

    #[test]
    fn test_fork_from_kernel_is_rejected() {
        let (mut scheduler, _) = started();
        let worker = spawn(&mut scheduler, "worker");
        run(&mut scheduler, worker);
        let registers = *scheduler.processor().registers();
        assert_eq!(scheduler.fork(&registers), Err(ExecError::InvalidArgument));
    }

    #[test]
    fn test_fork_failure_leaves_nothing_behind() {
        let (mut scheduler, log) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, parent);
        log.lock().unwrap().fail_clone = true;
        let registers = *scheduler.processor().registers();
        assert_eq!(scheduler.fork(&registers), Err(ExecError::OutOfMemory));
        assert_eq!(scheduler.process_count(), 2);
        assert!(scheduler.process(parent).unwrap().children().is_empty());
        scheduler.check_invariants();
    }

    #[test]
    fn test_wait_receives_child_exit_status() {
        let (mut scheduler, log) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        let waiter = run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);

        assert_eq!(scheduler.wait(child, WaitOptions::empty()), Ok(WaitOutcome::Blocked));
        assert_eq!(scheduler.thread(waiter).unwrap().state(), ThreadState::Blocked);
        assert_eq!(scheduler.current_process(), child);

        scheduler.exit_process(ExitStatus::exited(7));
        assert_eq!(scheduler.current_thread(), waiter);
        assert_eq!(scheduler.process(child).unwrap().state(), ProcessState::Zombie);

        let (pid, status) = scheduler.take_wait_result().unwrap();
        assert_eq!(pid, child);
        assert_eq!(status.exit_code(), Some(7));
        assert_eq!(status.raw(), 7 << 8);
        assert!(scheduler.process(child).is_none());
        assert!(scheduler.thread(ThreadId::from_raw(child.as_u64())).is_none());
        assert_eq!(log.lock().unwrap().released.len(), 1);
        assert!(scheduler.take_wait_result().is_none());
        scheduler.check_invariants();
    }

    #[test]
    fn test_exit_wakes_waiter_without_a_tick() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        let waiter = run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);
        scheduler.wait(child, WaitOptions::empty()).unwrap();

        let ticks = scheduler.ticks();
        assert_eq!(scheduler.try_wake_all(child, ExitStatus::exited(3)), 1);
        assert_eq!(scheduler.thread(waiter).unwrap().state(), ThreadState::Running);
        assert!(scheduler.is_queued(waiter));
        assert_eq!(scheduler.ticks(), ticks);
        scheduler.check_invariants();
    }

    #[test]
    fn test_rewait_after_unblock_drops_the_abandoned_wait() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        let waiter = run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);

        scheduler.wait(child, WaitOptions::empty()).unwrap();
        scheduler.unblock(waiter).unwrap();
        run(&mut scheduler, waiter);
        assert_eq!(scheduler.wait(child, WaitOptions::empty()), Ok(WaitOutcome::Blocked));
        assert_eq!(scheduler.waits.len(), 1);

        scheduler.exit_process(ExitStatus::exited(1));
        assert_eq!(scheduler.take_wait_result(), Some((child, ExitStatus::exited(1))));
        assert!(scheduler.waits.is_empty());
        scheduler.check_invariants();
    }

    #[test]
    fn test_wait_on_exited_child_reaps_at_once() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);
        scheduler.kill_process(child, crate::process::SIGHUP).unwrap();

        let outcome = scheduler.wait(child, WaitOptions::empty()).unwrap();
        let WaitOutcome::Reaped(pid, status) = outcome else {
            panic!("expected a reaped child, got {:?}", outcome);
        };
        assert_eq!(pid, child);
        assert_eq!(status.term_signal(), Some(crate::process::SIGHUP));
        assert!(scheduler.process(child).is_none());
        scheduler.check_invariants();
    }

    #[test]
    fn test_wait_nohang_and_non_child() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        let other = spawn_user(&mut scheduler, "other");
        run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);

        assert_eq!(scheduler.wait(child, WaitOptions::NOHANG), Ok(WaitOutcome::StillRunning));
        assert_eq!(scheduler.wait(other, WaitOptions::empty()), Err(ExecError::NoChild));
        assert_eq!(scheduler.wait(ProcessId::from_raw(999), WaitOptions::NOHANG), Err(ExecError::NoChild));
    }

    #[test]
    fn test_kill_while_blocked_is_immediate() {
        let (mut scheduler, _) = started();
        let a = spawn(&mut scheduler, "a");
        run(&mut scheduler, a);
        scheduler.block(BooleanBlocker::new().into());

        scheduler.kill(a).unwrap();
        let thread = scheduler.thread(a).unwrap();
        assert_eq!(thread.state(), ThreadState::Zombie);
        assert!(thread.blocker().is_none());
        assert!(!scheduler.is_queued(a));
        scheduler.check_invariants();
        assert_eq!(scheduler.kill(a), Err(ExecError::InvalidState));
        assert_eq!(scheduler.kill(scheduler.idle_thread()), Err(ExecError::InvalidArgument));
    }

    #[test]
    fn test_killing_last_thread_kills_process() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, parent);
        let child = fork_current(&mut scheduler);
        scheduler.wait(child, WaitOptions::empty()).unwrap();
        let child_main = ThreadId::from_raw(child.as_u64());
        run(&mut scheduler, child_main);
        scheduler.block(BooleanBlocker::new().into());

        scheduler.kill(child_main).unwrap();
        assert_eq!(scheduler.process(child).unwrap().exit_status(), Some(ExitStatus::killed(SIGKILL)));
        let waiter = ThreadId::from_raw(parent.as_u64());
        assert!(scheduler.is_queued(waiter));
        scheduler.check_invariants();
    }

    #[test]
    fn test_exit_of_last_thread_exits_process() {
        let (mut scheduler, _) = started();
        let pid = spawn_user(&mut scheduler, "true");
        run_main(&mut scheduler, pid);
        scheduler.exit_thread(4);
        // No one waits and the parent is the boot process: reaped on the
        // next invocation.
        assert_eq!(scheduler.process(pid).unwrap().exit_status(), Some(ExitStatus::exited(4)));
        scheduler.yield_now();
        assert!(scheduler.process(pid).is_none());
        assert_eq!(scheduler.stats().exits, 1);
        scheduler.check_invariants();
    }

    #[test]
    fn test_orphans_are_adopted_by_boot_process() {
        let (mut scheduler, _) = started();
        let parent = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, parent);
        let running = fork_current(&mut scheduler);
        let exited = fork_current(&mut scheduler);
        scheduler.kill_process(exited, SIGKILL).unwrap();

        scheduler.exit_process(ExitStatus::exited(0));
        let boot = scheduler.boot_process();
        assert_eq!(scheduler.process(running).unwrap().parent(), boot);
        assert!(scheduler.process(boot).unwrap().has_child(running));
        assert!(scheduler.process(exited).is_none());
        scheduler.check_invariants();
    }

    #[test]
    fn test_exec_replaces_image_in_place() {
        let (mut scheduler, log) = started();
        let pid = spawn_user(&mut scheduler, "sh");
        let old_main = run_main(&mut scheduler, pid);
        scheduler
            .process_mut(pid)
            .unwrap()
            .files_mut()
            .insert(NamedFile::open("/dev/tty"))
            .unwrap();
        let old_space = scheduler.process(pid).unwrap().address_space();

        let space = scheduler.memory_mut().create_address_space().unwrap();
        let image = UserImage { entry: VirtAddr::new(0x50_0000), address_space: space };
        let main = scheduler.exec("ls", image, ProcessArguments::new(["ls", "-l"])).unwrap();

        assert_eq!(scheduler.current_thread(), main);
        assert_eq!(scheduler.processor().registers().rip, 0x50_0000);
        let process = scheduler.process(pid).unwrap();
        assert_eq!(process.name(), "ls");
        assert_eq!(process.main_thread(), Some(main));
        assert_eq!(process.address_space(), space);
        assert_eq!(process.files().open_count(), 1);
        assert_eq!(scheduler.thread(old_main).unwrap().state(), ThreadState::Zombie);

        scheduler.yield_now();
        assert!(scheduler.thread(old_main).is_none());
        assert!(log.lock().unwrap().released.contains(&old_space));
        scheduler.check_invariants();
    }

    #[test]
    fn test_page_faults() {
        let (mut scheduler, log) = started();
        let pid = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, pid);

        let resolved = scheduler.handle_page_fault(VirtAddr::new(0x7000_0000), FaultAccess::Write);
        assert_eq!(resolved, FaultResolution::Resolved);
        let space = scheduler.process(pid).unwrap().address_space();
        assert_eq!(log.lock().unwrap().faults[0].0, space);

        let killed = scheduler.handle_page_fault(VirtAddr::new(0), FaultAccess::Read);
        assert_eq!(killed, FaultResolution::Killed);
        assert_eq!(scheduler.process(pid).unwrap().exit_status(), Some(ExitStatus::killed(SIGSEGV)));
        assert_eq!(scheduler.current_thread(), scheduler.idle_thread());
        scheduler.check_invariants();
    }

    #[test]
    #[should_panic(expected = "unresolved kernel page fault")]
    fn test_kernel_page_fault_is_fatal() {
        let (mut scheduler, _) = started();
        let worker = spawn(&mut scheduler, "worker");
        run(&mut scheduler, worker);
        scheduler.handle_page_fault(VirtAddr::new(0xFFFF_8000_0000_0000), FaultAccess::Execute);
    }

    #[test]
    fn test_chdir_applies_to_current_process() {
        let (mut scheduler, _) = started();
        let pid = spawn_user(&mut scheduler, "sh");
        run_main(&mut scheduler, pid);
        scheduler.chdir("/usr").unwrap();
        assert_eq!(scheduler.cwd(), "/usr");
        assert_eq!(scheduler.chdir("usr"), Err(ExecError::InvalidArgument));
        assert_eq!(scheduler.process(scheduler.boot_process()).unwrap().cwd(), "/");
    }
}
