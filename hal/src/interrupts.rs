//! # Interrupt Control
//!
//! cli/sti for the running processor and scoped disabling.
//!
//! On bare metal these are the real instructions. Hosted builds emulate the
//! interrupt flag; with `std` (and in tests) every host thread behaves as its
//! own processor.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(all(target_os = "none", target_arch = "x86_64"))] {
        use crate::arch::x86_64::cpu as imp;
    } else if #[cfg(all(target_os = "none", target_arch = "x86"))] {
        use crate::arch::x86::cpu as imp;
    } else {
        use self::emulated as imp;
    }
}

/// Disable interrupts on this processor
///
/// # Safety
/// Interrupts stay off until re-enabled; a caller that never re-enables them
/// stops the timer tick.
#[inline]
pub unsafe fn disable() {
    unsafe { imp::disable_interrupts() }
}

/// Enable interrupts on this processor
///
/// # Safety
/// Handlers may run immediately, so shared state must be consistent.
#[inline]
pub unsafe fn enable() {
    unsafe { imp::enable_interrupts() }
}

/// Check if interrupts are enabled
#[inline]
pub fn are_enabled() -> bool {
    imp::are_interrupts_enabled()
}

/// Enable interrupts and wait for the next one
///
/// The body of the idle thread. Hosted builds only pause the spin loop.
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: the idle thread holds no locks.
    unsafe { enable() }
    imp::halt();
}

/// Execute with interrupts disabled
///
/// Disables interrupts, executes the closure, and restores the previous state.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = InterruptGuard::new();
    f()
}

/// Disables interrupts for its lifetime and restores the previous state on drop
#[derive(Debug)]
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct InterruptGuard {
    were_enabled: bool,
}

impl InterruptGuard {
    /// Disable interrupts, remembering whether they were on
    pub fn new() -> Self {
        let were_enabled = are_enabled();
        if were_enabled {
            // SAFETY: restored in `drop`.
            unsafe { disable() }
        }
        Self { were_enabled }
    }

    /// Whether interrupts were enabled when the guard was taken
    pub fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            // SAFETY: restores the state observed in `new`.
            unsafe { enable() }
        }
    }
}

#[cfg(not(target_os = "none"))]
mod emulated {
    pub fn halt() {
        core::hint::spin_loop();
    }

    cfg_if::cfg_if! {
        if #[cfg(any(test, feature = "std"))] {
            use core::cell::Cell;

            std::thread_local! {
                static ENABLED: Cell<bool> = const { Cell::new(true) };
            }

            pub unsafe fn disable_interrupts() {
                ENABLED.with(|flag| flag.set(false));
            }

            pub unsafe fn enable_interrupts() {
                ENABLED.with(|flag| flag.set(true));
            }

            pub fn are_interrupts_enabled() -> bool {
                ENABLED.with(Cell::get)
            }
        } else {
            use core::sync::atomic::{AtomicBool, Ordering};

            static ENABLED: AtomicBool = AtomicBool::new(true);

            pub unsafe fn disable_interrupts() {
                ENABLED.store(false, Ordering::SeqCst);
            }

            pub unsafe fn enable_interrupts() {
                ENABLED.store(true, Ordering::SeqCst);
            }

            pub fn are_interrupts_enabled() -> bool {
                ENABLED.load(Ordering::SeqCst)
            }
        }
    }
}
