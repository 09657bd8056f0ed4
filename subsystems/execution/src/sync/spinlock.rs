//! Interrupt-disabling spin lock.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use ember_hal::interrupts;
use spin::relax::{RelaxStrategy, Spin};

const FREE: u8 = 0;
const HELD: u8 = 1;

/// Spin lock without data
pub struct RawSpinLock {
    state: AtomicU8,
    // Interrupt state of the holder at lock time; only the holder writes it.
    restore_interrupts: AtomicBool,
}

impl RawSpinLock {
    /// Create an unlocked lock
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            restore_interrupts: AtomicBool::new(false),
        }
    }

    /// Disable interrupts, then spin until the lock is taken
    pub fn lock(&self) {
        let were_enabled = interrupts::are_enabled();
        // SAFETY: restored by `unlock`.
        unsafe { interrupts::disable() }

        while self
            .state
            .compare_exchange_weak(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.state.load(Ordering::Relaxed) != FREE {
                Spin::relax();
            }
        }
        self.restore_interrupts.store(were_enabled, Ordering::Relaxed);
    }

    /// Take the lock if it is free, leaving interrupts untouched otherwise
    pub fn try_lock(&self) -> bool {
        let were_enabled = interrupts::are_enabled();
        // SAFETY: restored below on failure, by `unlock` on success.
        unsafe { interrupts::disable() }

        if self
            .state
            .compare_exchange(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.restore_interrupts.store(were_enabled, Ordering::Relaxed);
            true
        } else {
            if were_enabled {
                // SAFETY: interrupts were on when we were called.
                unsafe { interrupts::enable() }
            }
            false
        }
    }

    /// Release the lock and restore the interrupt state from `lock`
    ///
    /// Releasing a lock that is not held is a kernel bug and panics.
    pub fn unlock(&self) {
        let restore = self.restore_interrupts.load(Ordering::Relaxed);
        if self.state.swap(FREE, Ordering::Release) != HELD {
            log::error!("spin lock at {:p} released while free", self);
            panic!("unlock of a spin lock that is not held");
        }
        if restore {
            // SAFETY: interrupts were on before `lock`.
            unsafe { interrupts::enable() }
        }
    }

    /// Whether some context holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == HELD
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock").field("locked", &self.is_locked()).finish()
    }
}

/// Spin lock protecting a value
pub struct SpinLock<T: ?Sized> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create an unlocked lock around `value`
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock, returning the value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Lock, returning a guard that unlocks on drop
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.lock();
        SpinLockGuard { lock: self }
    }

    /// Lock if free
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw.try_lock().then(|| SpinLockGuard { lock: self })
    }

    /// Run `f` with the value locked
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Whether the lock is held
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Mutable access without locking; `&mut self` proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinLock").field("data", &&*guard).finish(),
            None => f.write_str("SpinLock { <locked> }"),
        }
    }
}

/// Holds a [`SpinLock`] until dropped
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_interrupts_off_while_held() {
        let lock = SpinLock::new(0u32);
        assert!(interrupts::are_enabled());
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(!interrupts::are_enabled());
            assert!(lock.is_locked());
        }
        assert!(interrupts::are_enabled());
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn test_nested_locks_keep_interrupts_off_until_outer_release() {
        let outer = RawSpinLock::new();
        let inner = RawSpinLock::new();
        outer.lock();
        inner.lock();
        inner.unlock();
        assert!(!interrupts::are_enabled());
        outer.unlock();
        assert!(interrupts::are_enabled());
    }

    #[test]
    fn test_try_lock_fails_when_held_and_restores_interrupts() {
        let lock = RawSpinLock::new();
        lock.lock();
        let lock = Arc::new(lock);
        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || {
            let got = other.try_lock();
            (got, interrupts::are_enabled())
        })
        .join()
        .unwrap();
        assert_eq!(acquired, (false, true));
        lock.unlock();
    }

    #[test]
    fn test_contention_is_resolved_by_waiting() {
        let counter = Arc::new(SpinLock::new(0u64));
        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.with(|value| *value += 1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_unlock_of_free_lock_is_fatal() {
        RawSpinLock::new().unlock();
    }
}
