//! # Kernel Locks
//!
//! - [`SpinLock`]: one atomic byte, no owner. Disables interrupts before
//!   spinning and keeps them off while held, so it is safe to share with
//!   interrupt handlers. The holder must not block or yield.
//! - [`Mutex`]: owner word plus recursion count. The owning thread may lock
//!   it again. Contention is resolved by spinning: with one logical
//!   processor only the holder can make progress while another thread
//!   waits, and critical sections are short.
//!
//! Both come in a raw form with explicit `lock`/`unlock` and a data-owning
//! form that hands out guards.

mod mutex;
mod spinlock;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};

static_assertions::assert_impl_all!(SpinLock<u64>: Send, Sync);
static_assertions::assert_impl_all!(Mutex<u64>: Send, Sync);
