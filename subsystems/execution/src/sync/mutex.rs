//! Recursive spin-mutex keyed on the running thread's id.

use crate::ThreadId;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use ember_hal::percpu;
use spin::relax::{RelaxStrategy, Spin};

const UNOWNED: u64 = u64::MAX;

/// Recursive mutex without data
///
/// `recursion > 0` exactly when `owner` holds a thread id.
pub struct RawMutex {
    owner: AtomicU64,
    recursion: AtomicUsize,
}

impl RawMutex {
    /// Create an unowned mutex
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNOWNED),
            recursion: AtomicUsize::new(0),
        }
    }

    /// Acquire for the running thread, re-entering if it already owns it
    pub fn lock(&self) {
        let me = percpu::current_thread();
        if self.owner.load(Ordering::Acquire) == me {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while self
            .owner
            .compare_exchange_weak(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            Spin::relax();
        }
        self.recursion.store(1, Ordering::Relaxed);
    }

    /// Acquire if free or already owned by the running thread
    pub fn try_lock(&self) -> bool {
        let me = percpu::current_thread();
        match self
            .owner
            .compare_exchange(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                self.recursion.store(1, Ordering::Relaxed);
                true
            }
            Err(owner) if owner == me => {
                self.recursion.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Undo one `lock`; ownership is released when the count reaches zero
    ///
    /// Unlocking a mutex the running thread does not own is a kernel bug and
    /// panics.
    pub fn unlock(&self) {
        let me = percpu::current_thread();
        let owner = self.owner.load(Ordering::Relaxed);
        if owner != me {
            log::error!("thread {} unlocked mutex {:p} owned by {:#x}", me, self, owner);
            panic!("unlock of a mutex not held by the caller");
        }
        if self.recursion.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(UNOWNED, Ordering::Release);
        }
    }

    /// Whether any thread owns the mutex
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNOWNED
    }

    /// Owning thread
    pub fn owner(&self) -> Option<ThreadId> {
        match self.owner.load(Ordering::Relaxed) {
            UNOWNED => None,
            raw => Some(ThreadId::from_raw(raw)),
        }
    }

    /// Current recursion depth
    pub fn recursion(&self) -> usize {
        self.recursion.load(Ordering::Relaxed)
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex")
            .field("owner", &self.owner())
            .field("recursion", &self.recursion())
            .finish()
    }
}

/// Recursive mutex protecting a value
///
/// Guards only give shared access because the owner may hold several at
/// once; use interior mutability inside.
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: T,
}

// SAFETY: only the owning thread reaches `data`, possibly through several guards.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create an unowned mutex around `value`
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: value,
        }
    }

    /// Consume the mutex, returning the value
    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Lock for the running thread
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Lock if free or already owned by the running thread
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().then(|| MutexGuard { mutex: self })
    }

    /// Whether any thread owns the mutex
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// The underlying owner/recursion word pair
    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Holds one level of a [`Mutex`] until dropped
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.mutex.data
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
