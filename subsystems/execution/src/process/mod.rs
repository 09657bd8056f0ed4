//! # Process Management
//!
//! A process owns an address space, one or more threads, open file
//! descriptors and a working directory. Threads and relatives are referred
//! to by id; the scheduler's tables own the objects.

mod files;
mod status;

pub use files::{Fd, FileDescriptorTable, OpenFile};
pub use status::{ExitStatus, SIGHUP, SIGKILL, SIGSEGV};

use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::string::String;
use alloc::vec::Vec;
use ember_hal::PhysAddr;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// At least one thread is alive
    Running,
    /// Exited, status not yet collected
    Zombie,
    /// Reaped; about to be removed from the process table
    Dead,
}

/// Process structure
#[derive(Debug)]
pub struct Process {
    /// Process ID
    id: ProcessId,
    /// Parent process ([`ProcessId::NONE`] only for the boot process)
    parent: ProcessId,
    /// Process name
    name: String,
    /// Current state
    state: ProcessState,
    /// Page-table root
    address_space: PhysAddr,
    /// Main thread
    main_thread: Option<ThreadId>,
    /// All threads, in creation order
    threads: Vec<ThreadId>,
    /// Child processes
    children: Vec<ProcessId>,
    /// Exit status, once a zombie
    exit_status: Option<ExitStatus>,
    files: FileDescriptorTable,
    cwd: String,
}

impl Process {
    /// Create a process with no threads yet
    pub fn new(id: ProcessId, parent: ProcessId, name: impl Into<String>, address_space: PhysAddr) -> Self {
        Self {
            id,
            parent,
            name: name.into(),
            state: ProcessState::Running,
            address_space,
            main_thread: None,
            threads: Vec::new(),
            children: Vec::new(),
            exit_status: None,
            files: FileDescriptorTable::new(),
            cwd: String::from("/"),
        }
    }

    /// Copy of this process for `fork`: same name, descriptors and cwd
    pub fn fork(&self, id: ProcessId, address_space: PhysAddr) -> Self {
        Self {
            files: self.files.clone(),
            cwd: self.cwd.clone(),
            ..Self::new(id, self.id, self.name.clone(), address_space)
        }
    }

    /// Get process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Get parent process
    pub fn parent(&self) -> ProcessId {
        self.parent
    }

    /// Get process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Page-table root
    pub fn address_space(&self) -> PhysAddr {
        self.address_space
    }

    /// Get main thread
    pub fn main_thread(&self) -> Option<ThreadId> {
        self.main_thread
    }

    /// Threads of this process, in creation order
    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    /// Child processes
    pub fn children(&self) -> &[ProcessId] {
        &self.children
    }

    /// Whether `pid` is a child of this process
    pub fn has_child(&self, pid: ProcessId) -> bool {
        self.children.contains(&pid)
    }

    /// Exit status, once the process is a zombie
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Whether the process has exited
    pub fn is_exited(&self) -> bool {
        self.state != ProcessState::Running
    }

    /// Open file descriptors
    pub fn files(&self) -> &FileDescriptorTable {
        &self.files
    }

    /// Mutable file descriptors
    pub fn files_mut(&mut self) -> &mut FileDescriptorTable {
        &mut self.files
    }

    /// Current working directory
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Change the working directory; the path must already be resolved
    pub fn chdir(&mut self, path: impl Into<String>) -> ExecResult<()> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ExecError::InvalidArgument);
        }
        self.cwd = path;
        Ok(())
    }

    pub(crate) fn add_thread(&mut self, thread: ThreadId) {
        if self.main_thread.is_none() {
            self.main_thread = Some(thread);
        }
        self.threads.push(thread);
    }

    pub(crate) fn remove_thread(&mut self, thread: ThreadId) {
        self.threads.retain(|&t| t != thread);
    }

    pub(crate) fn add_child(&mut self, child: ProcessId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: ProcessId) {
        self.children.retain(|&c| c != child);
    }

    pub(crate) fn take_children(&mut self) -> Vec<ProcessId> {
        core::mem::take(&mut self.children)
    }

    pub(crate) fn set_parent(&mut self, parent: ProcessId) {
        self.parent = parent;
    }

    /// Swap in a new program image, returning the old address space
    pub(crate) fn replace_image(&mut self, name: impl Into<String>, address_space: PhysAddr, main: ThreadId) -> PhysAddr {
        self.name = name.into();
        self.main_thread = Some(main);
        core::mem::replace(&mut self.address_space, address_space)
    }

    pub(crate) fn mark_zombie(&mut self, status: ExitStatus) {
        debug_assert_eq!(self.state, ProcessState::Running, "{} exited twice", self.id);
        self.exit_status = Some(status);
        self.state = ProcessState::Zombie;
    }

    pub(crate) fn mark_dead(&mut self) {
        assert_eq!(self.state, ProcessState::Zombie, "{} reaped before exiting", self.id);
        self.state = ProcessState::Dead;
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NamedFile;

    fn pid(raw: u64) -> ProcessId {
        ProcessId::from_raw(raw)
    }

    #[test]
    fn test_first_thread_becomes_main() {
        let mut process = Process::new(pid(4), pid(1), "sh", PhysAddr::new(0x1000));
        process.add_thread(ThreadId::from_raw(4));
        process.add_thread(ThreadId::from_raw(9));
        assert_eq!(process.main_thread(), Some(ThreadId::from_raw(4)));
        process.remove_thread(ThreadId::from_raw(4));
        assert_eq!(process.threads(), &[ThreadId::from_raw(9)]);
    }

    #[test]
    fn test_fork_copies_descriptors_and_cwd() {
        let mut parent = Process::new(pid(2), pid(1), "init", PhysAddr::new(0x1000));
        parent.files_mut().insert(NamedFile::open("/dev/console")).unwrap();
        parent.chdir("/home").unwrap();

        let child = parent.fork(pid(3), PhysAddr::new(0x2000));
        assert_eq!(child.parent(), pid(2));
        assert_eq!(child.name(), "init");
        assert_eq!(child.cwd(), "/home");
        assert_eq!(child.files().open_count(), 1);
        assert_eq!(child.address_space(), PhysAddr::new(0x2000));
        assert!(child.threads().is_empty());
    }

    #[test]
    fn test_chdir_requires_absolute_path() {
        let mut process = Process::new(pid(2), pid(1), "init", PhysAddr::new(0));
        assert_eq!(process.chdir("relative"), Err(ExecError::InvalidArgument));
        assert_eq!(process.cwd(), "/");
    }

    #[test]
    fn test_exit_then_reap() {
        let mut process = Process::new(pid(2), pid(1), "init", PhysAddr::new(0));
        process.mark_zombie(ExitStatus::exited(3));
        assert_eq!(process.state(), ProcessState::Zombie);
        assert_eq!(process.exit_status().and_then(ExitStatus::exit_code), Some(3));
        process.mark_dead();
        assert_eq!(process.state(), ProcessState::Dead);
    }

    #[test]
    #[should_panic(expected = "reaped before exiting")]
    fn test_reap_of_running_process_is_fatal() {
        Process::new(pid(2), pid(1), "init", PhysAddr::new(0)).mark_dead();
    }
}
