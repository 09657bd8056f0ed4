//! # Memory Management Interface
//!
//! The execution core does not manage page frames or page tables. It asks
//! the memory subsystem for stacks and address spaces through
//! [`MemoryManager`] and forwards page faults to it.

use crate::ExecResult;
use ember_hal::stack::Stack;
use ember_hal::{PhysAddr, VirtAddr};

/// Kind of access that faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    /// Data read
    Read,
    /// Data write
    Write,
    /// Instruction fetch
    Execute,
}

/// A loaded program, ready for its first thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserImage {
    /// Entry point
    pub entry: VirtAddr,
    /// Address space the image is mapped into
    pub address_space: PhysAddr,
}

/// Services the scheduler consumes from the memory subsystem
pub trait MemoryManager: Send {
    /// Page-table root shared by kernel threads
    fn kernel_address_space(&self) -> PhysAddr;

    /// Allocate a kernel stack of `size` bytes
    fn allocate_kernel_stack(&mut self, size: usize) -> ExecResult<Stack> {
        Ok(Stack::new(size)?)
    }

    /// Allocate and map a user stack of `size` bytes in `address_space`
    fn allocate_user_stack(&mut self, address_space: PhysAddr, size: usize) -> ExecResult<Stack>;

    /// Create an empty user address space
    fn create_address_space(&mut self) -> ExecResult<PhysAddr>;

    /// Copy an address space for `fork`
    fn clone_address_space(&mut self, source: PhysAddr) -> ExecResult<PhysAddr>;

    /// Release an address space no thread runs in any more
    fn release_address_space(&mut self, root: PhysAddr);

    /// Resolve a fault at `address`, mapping on demand
    ///
    /// An error means the access is invalid.
    fn handle_page_fault(&mut self, address_space: PhysAddr, address: VirtAddr, access: FaultAccess) -> ExecResult<()>;
}
