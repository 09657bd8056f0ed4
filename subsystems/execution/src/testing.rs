//! Test doubles shared by the unit tests.

use crate::memory::{FaultAccess, MemoryManager, UserImage};
use crate::process::OpenFile;
use crate::scheduler::Scheduler;
use crate::thread::ProcessArguments;
use crate::{ExecError, ExecResult, ProcessId, SchedulerConfig, ThreadId};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ember_hal::arch::x86_64;
use ember_hal::sim::SimulatedProcessor;
use ember_hal::stack::Stack;
use ember_hal::{PhysAddr, VirtAddr};
use std::sync::Mutex;

pub type TestRegisters = x86_64::ThreadRegisters;
pub type TestScheduler = Scheduler<SimulatedProcessor<TestRegisters>>;

pub const KERNEL_SPACE: PhysAddr = PhysAddr::new(0x1000);

/// Lowest and highest user address a fault can be resolved at
const USER_START: u64 = 0x1000;
const USER_END: u64 = 0x0000_8000_0000_0000;

#[derive(Debug)]
pub struct NamedFile {
    path: String,
}

impl NamedFile {
    pub fn open(path: &str) -> Arc<NamedFile> {
        Arc::new(NamedFile { path: String::from(path) })
    }
}

impl OpenFile for NamedFile {
    fn path(&self) -> &str {
        &self.path
    }
}

/// What the fake memory subsystem was asked to do
#[derive(Debug, Default)]
pub struct MemoryLog {
    pub created: Vec<PhysAddr>,
    pub cloned: Vec<(PhysAddr, PhysAddr)>,
    pub released: Vec<PhysAddr>,
    pub faults: Vec<(PhysAddr, VirtAddr, FaultAccess)>,
    pub fail_clone: bool,
}

pub type SharedLog = Arc<Mutex<MemoryLog>>;

#[derive(Debug)]
pub struct FakeMemory {
    log: SharedLog,
    next_root: u64,
}

impl FakeMemory {
    pub fn new() -> (Self, SharedLog) {
        let log = SharedLog::default();
        (Self { log: log.clone(), next_root: 0x10_0000 }, log)
    }

    fn next_root(&mut self) -> PhysAddr {
        let root = PhysAddr::new(self.next_root);
        self.next_root += 0x1000;
        root
    }
}

impl MemoryManager for FakeMemory {
    fn kernel_address_space(&self) -> PhysAddr {
        KERNEL_SPACE
    }

    fn allocate_user_stack(&mut self, _address_space: PhysAddr, size: usize) -> ExecResult<Stack> {
        Ok(Stack::new(size)?)
    }

    fn create_address_space(&mut self) -> ExecResult<PhysAddr> {
        let root = self.next_root();
        self.log.lock().unwrap().created.push(root);
        Ok(root)
    }

    fn clone_address_space(&mut self, source: PhysAddr) -> ExecResult<PhysAddr> {
        if self.log.lock().unwrap().fail_clone {
            return Err(ExecError::OutOfMemory);
        }
        let root = self.next_root();
        self.log.lock().unwrap().cloned.push((source, root));
        Ok(root)
    }

    fn release_address_space(&mut self, root: PhysAddr) {
        self.log.lock().unwrap().released.push(root);
    }

    fn handle_page_fault(&mut self, address_space: PhysAddr, address: VirtAddr, access: FaultAccess) -> ExecResult<()> {
        self.log.lock().unwrap().faults.push((address_space, address, access));
        if (USER_START..USER_END).contains(&address.as_u64()) {
            Ok(())
        } else {
            Err(ExecError::InvalidArgument)
        }
    }
}

pub extern "C" fn returns_argument(arg: usize) -> usize {
    arg
}

/// Scheduler over the simulated processor, not yet started
pub fn scheduler_with(config: SchedulerConfig) -> (TestScheduler, SharedLog) {
    let (memory, log) = FakeMemory::new();
    let scheduler = Scheduler::new(SimulatedProcessor::new(), alloc::boxed::Box::new(memory), config).unwrap();
    (scheduler, log)
}

/// Started scheduler running its idle thread
pub fn started() -> (TestScheduler, SharedLog) {
    let (mut scheduler, log) = scheduler_with(SchedulerConfig::simple());
    scheduler.start();
    (scheduler, log)
}

pub fn spawn(scheduler: &mut TestScheduler, name: &str) -> ThreadId {
    scheduler.spawn_kernel_thread(name, returns_argument, 0).unwrap()
}

/// Start a user program as a child of the current process
pub fn spawn_user(scheduler: &mut TestScheduler, name: &str) -> ProcessId {
    let address_space = scheduler.memory_mut().create_address_space().unwrap();
    let image = UserImage {
        entry: VirtAddr::new(0x40_0000),
        address_space,
    };
    scheduler.spawn_process(name, image, ProcessArguments::new([name])).unwrap()
}

/// Yield until `thread` runs
pub fn run(scheduler: &mut TestScheduler, thread: ThreadId) {
    for _ in 0..64 {
        if scheduler.current_thread() == thread {
            return;
        }
        scheduler.yield_now();
    }
    panic!("{} never got the processor", thread);
}
