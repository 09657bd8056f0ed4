//! # Scheduler Metrics
//!
//! Metrics and statistics for scheduler performance monitoring.

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler metrics
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Total context switches
    context_switches: AtomicU64,
    /// Total timer ticks
    ticks: AtomicU64,
    /// Ticks taken while the idle thread ran
    idle_ticks: AtomicU64,
    /// Total voluntary yields
    voluntary_yields: AtomicU64,
    /// Total preemptions
    preemptions: AtomicU64,
    /// Threads that blocked
    blocks: AtomicU64,
    /// Threads that were unblocked
    wakeups: AtomicU64,
    /// Successful forks
    forks: AtomicU64,
    /// Process exits
    exits: AtomicU64,
}

/// Point-in-time copy of [`SchedulerMetrics`]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub context_switches: u64,
    pub ticks: u64,
    pub idle_ticks: u64,
    pub voluntary_yields: u64,
    pub preemptions: u64,
    pub blocks: u64,
    pub wakeups: u64,
    pub forks: u64,
    pub exits: u64,
}

impl SchedulerMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            voluntary_yields: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            forks: AtomicU64::new(0),
            exits: AtomicU64::new(0),
        }
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timer tick
    pub fn record_tick(&self, idle: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if idle {
            self.idle_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.voluntary_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a thread blocking
    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a thread unblocking
    pub fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fork
    pub fn record_fork(&self) {
        self.forks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a process exit
    pub fn record_exit(&self) {
        self.exits.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total context switches
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get total ticks
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get CPU utilization (percentage of ticks not spent idle)
    pub fn cpu_utilization(&self) -> u8 {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let idle = self.idle_ticks.load(Ordering::Relaxed);

        if ticks == 0 {
            0
        } else {
            ((ticks - idle) * 100 / ticks) as u8
        }
    }

    /// Copy every counter
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            voluntary_yields: self.voluntary_yields.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            forks: self.forks.load(Ordering::Relaxed),
            exits: self.exits.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.context_switches.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.idle_ticks.store(0, Ordering::Relaxed);
        self.voluntary_yields.store(0, Ordering::Relaxed);
        self.preemptions.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
        self.wakeups.store(0, Ordering::Relaxed);
        self.forks.store(0, Ordering::Relaxed);
        self.exits.store(0, Ordering::Relaxed);
    }
}
