//! # Stacks
//!
//! An owned, fixed-size memory region with a descending bump pointer. Kernel
//! stacks hold a thread's saved register image between switches; user stacks
//! receive the initial argument package.
//!
//! Register frames are written through the [`FrameStack`] trait so the same
//! push/pop sequence works on an owned [`Stack`] and on a [`RawStack`]
//! cursor positioned at a saved stack pointer.

use crate::{HalError, HalResult, VirtAddr};
use alloc::alloc::{alloc, dealloc, Layout};
use core::fmt;
use core::mem::size_of;
use core::ptr::NonNull;

/// Alignment of every stack region and of the initial stack pointer
pub const STACK_ALIGN: usize = 16;

/// A downward-growing stack that register frames can be pushed onto
pub trait FrameStack {
    /// Push a value, moving the pointer down by its size
    fn push<T: Copy>(&mut self, value: T);

    /// Pop a value, moving the pointer up by its size
    fn pop<T: Copy>(&mut self) -> T;

    /// Current stack pointer
    fn pointer(&self) -> usize;
}

/// Owned stack region
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
    pointer: usize,
}

// SAFETY: the region is exclusively owned by this value.
unsafe impl Send for Stack {}

impl Stack {
    /// Allocate a stack of `size` bytes with the pointer at its top
    pub fn new(size: usize) -> HalResult<Self> {
        if size == 0 || size % STACK_ALIGN != 0 {
            return Err(HalError::InvalidParameter);
        }
        let layout = Layout::from_size_align(size, STACK_ALIGN)
            .map_err(|_| HalError::InvalidParameter)?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            log::warn!("stack: allocation of {} bytes failed", size);
            return Err(HalError::OutOfMemory);
        };
        Ok(Self {
            base,
            size,
            pointer: base.as_ptr() as usize + size,
        })
    }

    /// Lowest address of the region
    #[inline]
    pub fn bottom(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// One past the highest address of the region
    #[inline]
    pub fn top(&self) -> usize {
        self.bottom() + self.size
    }

    /// Top of the stack as a virtual address (what the TSS wants)
    #[inline]
    pub fn top_address(&self) -> VirtAddr {
        VirtAddr::new(self.top() as u64)
    }

    /// Size of the region in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current stack pointer
    #[inline]
    pub fn value(&self) -> usize {
        self.pointer
    }

    /// Bytes in use (distance from the top)
    #[inline]
    pub fn offset(&self) -> usize {
        self.top() - self.pointer
    }

    /// Bytes still available below the pointer
    #[inline]
    pub fn remaining(&self) -> usize {
        self.pointer - self.bottom()
    }

    /// Whether `addr` is a valid pointer value for this stack
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom() && addr <= self.top()
    }

    /// Move the pointer to a previously saved value
    pub fn set_pointer(&mut self, pointer: usize) {
        assert!(
            self.contains(pointer),
            "stack pointer {:#x} outside [{:#x}, {:#x}]",
            pointer,
            self.bottom(),
            self.top()
        );
        self.pointer = pointer;
    }

    /// Round the pointer down to `align`
    pub fn align_down(&mut self, align: usize) {
        debug_assert!(align.is_power_of_two());
        let aligned = self.pointer & !(align - 1);
        self.set_pointer(aligned);
    }

    /// Copy raw bytes onto the stack, returning their address
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        self.reserve(bytes.len());
        // SAFETY: `reserve` checked the destination lies inside the region.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.pointer as *mut u8, bytes.len());
        }
        self.pointer
    }

    /// Push a NUL-terminated copy of `s`, returning its address
    pub fn push_str(&mut self, s: &str) -> usize {
        self.push(0u8);
        self.push_bytes(s.as_bytes())
    }

    fn reserve(&mut self, len: usize) {
        assert!(
            len <= self.remaining(),
            "stack overflow: {} bytes requested, {} left",
            len,
            self.remaining()
        );
        self.pointer -= len;
    }
}

impl FrameStack for Stack {
    fn push<T: Copy>(&mut self, value: T) {
        self.reserve(size_of::<T>());
        // SAFETY: `reserve` checked the destination lies inside the region.
        unsafe { (self.pointer as *mut T).write_unaligned(value) }
    }

    fn pop<T: Copy>(&mut self) -> T {
        let len = size_of::<T>();
        assert!(
            self.offset() >= len,
            "stack underflow: {} bytes requested, {} in use",
            len,
            self.offset()
        );
        // SAFETY: the source lies inside the region.
        let value = unsafe { (self.pointer as *const T).read_unaligned() };
        self.pointer += len;
        value
    }

    fn pointer(&self) -> usize {
        self.pointer
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // The layout was validated in `new`.
        if let Ok(layout) = Layout::from_size_align(self.size, STACK_ALIGN) {
            // SAFETY: `base` came from `alloc` with this exact layout.
            unsafe { dealloc(self.base.as_ptr(), layout) }
        }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &format_args!("{:#x}", self.bottom()))
            .field("top", &format_args!("{:#x}", self.top()))
            .field("pointer", &format_args!("{:#x}", self.pointer))
            .finish()
    }
}

/// Unchecked cursor over a stack identified only by its pointer
///
/// Used by context-switch code that holds a saved stack pointer rather than
/// the owning [`Stack`].
#[derive(Debug)]
pub struct RawStack {
    pointer: usize,
}

impl RawStack {
    /// Position a cursor at `pointer`
    ///
    /// # Safety
    /// Every push and pop made through the cursor must stay inside memory
    /// that is valid, writable and not aliased for the cursor's lifetime.
    pub unsafe fn new(pointer: usize) -> Self {
        Self { pointer }
    }
}

impl FrameStack for RawStack {
    fn push<T: Copy>(&mut self, value: T) {
        self.pointer -= size_of::<T>();
        // SAFETY: guaranteed by the contract of `RawStack::new`.
        unsafe { (self.pointer as *mut T).write_unaligned(value) }
    }

    fn pop<T: Copy>(&mut self) -> T {
        // SAFETY: guaranteed by the contract of `RawStack::new`.
        let value = unsafe { (self.pointer as *const T).read_unaligned() };
        self.pointer += size_of::<T>();
        value
    }

    fn pointer(&self) -> usize {
        self.pointer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stack_is_empty_and_aligned() {
        let stack = Stack::new(4096).unwrap();
        assert_eq!(stack.size(), 4096);
        assert_eq!(stack.offset(), 0);
        assert_eq!(stack.value(), stack.top());
        assert_eq!(stack.top() % STACK_ALIGN, 0);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert_eq!(Stack::new(0).unwrap_err(), HalError::InvalidParameter);
        assert_eq!(Stack::new(100).unwrap_err(), HalError::InvalidParameter);
    }

    #[test]
    fn test_push_pop_lifo() {
        let mut stack = Stack::new(256).unwrap();
        stack.push(0x1122_3344_5566_7788u64);
        stack.push(0xAAu8);
        stack.push(0xDEAD_BEEFu32);
        assert_eq!(stack.offset(), 13);

        assert_eq!(stack.pop::<u32>(), 0xDEAD_BEEF);
        assert_eq!(stack.pop::<u8>(), 0xAA);
        assert_eq!(stack.pop::<u64>(), 0x1122_3344_5566_7788);
        assert_eq!(stack.offset(), 0);
    }

    #[test]
    fn test_push_str_is_nul_terminated() {
        let mut stack = Stack::new(64).unwrap();
        let addr = stack.push_str("init");
        assert_eq!(addr, stack.value());
        // SAFETY: the five bytes were just written inside the stack.
        let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, 5) };
        assert_eq!(bytes, b"init\0");
    }

    #[test]
    fn test_align_down() {
        let mut stack = Stack::new(64).unwrap();
        stack.push(1u8);
        stack.align_down(8);
        assert_eq!(stack.value() % 8, 0);
        assert_eq!(stack.offset(), 8);
    }

    #[test]
    fn test_raw_cursor_sees_owned_pushes() {
        let mut stack = Stack::new(64).unwrap();
        stack.push(7u64);
        stack.push(9u64);
        // SAFETY: the cursor only reads the two words pushed above.
        let mut cursor = unsafe { RawStack::new(stack.value()) };
        assert_eq!(cursor.pop::<u64>(), 9);
        assert_eq!(cursor.pop::<u64>(), 7);
        assert_eq!(cursor.pointer(), stack.top());
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn test_overflow_is_fatal() {
        let mut stack = Stack::new(16).unwrap();
        stack.push(0u64);
        stack.push(0u64);
        stack.push(0u8);
    }

    #[test]
    #[should_panic(expected = "stack underflow")]
    fn test_underflow_is_fatal() {
        let mut stack = Stack::new(16).unwrap();
        let _: u32 = stack.pop();
    }
}
