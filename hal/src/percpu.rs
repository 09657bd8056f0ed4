//! # CPU-Local Data
//!
//! The identity of the thread running on this processor. The scheduler
//! publishes it on every switch; recursive locks read it to track ownership.
//! Id 0 is the boot context, before the scheduler has started.

/// Identity of the boot context
pub const BOOT_THREAD: u64 = 0;

cfg_if::cfg_if! {
    if #[cfg(all(not(target_os = "none"), any(test, feature = "std")))] {
        use core::cell::Cell;

        std::thread_local! {
            static CURRENT_THREAD: Cell<u64> = const { Cell::new(BOOT_THREAD) };
        }

        /// Id of the thread running on this processor
        pub fn current_thread() -> u64 {
            CURRENT_THREAD.with(Cell::get)
        }

        /// Publish the id of the thread now running on this processor
        pub fn set_current_thread(id: u64) {
            CURRENT_THREAD.with(|cell| cell.set(id));
        }
    } else {
        use core::sync::atomic::{AtomicU64, Ordering};

        // Single processor; becomes a GS-relative slot with SMP.
        static CURRENT_THREAD: AtomicU64 = AtomicU64::new(BOOT_THREAD);

        /// Id of the thread running on this processor
        pub fn current_thread() -> u64 {
            CURRENT_THREAD.load(Ordering::Acquire)
        }

        /// Publish the id of the thread now running on this processor
        pub fn set_current_thread(id: u64) {
            CURRENT_THREAD.store(id, Ordering::Release);
        }
    }
}
