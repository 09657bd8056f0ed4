//! # Scheduler Configuration

use crate::{ExecError, ExecResult};
use core::time::Duration;
use ember_hal::stack::STACK_ALIGN;

/// Configuration for the round-robin scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between timer ticks
    pub tick_period: Duration,
    /// Ticks a thread may run before it is preempted
    pub time_slice_ticks: u32,
    /// Kernel stack size per thread, in bytes
    pub kernel_stack_size: usize,
    /// User stack size for new user threads, in bytes
    pub user_stack_size: usize,
    /// Maximum number of live threads
    pub max_threads: usize,
    /// Maximum number of live processes
    pub max_processes: usize,
    /// Wall-clock time at boot, as an offset from the Unix epoch
    pub realtime_epoch: Duration,
}

impl SchedulerConfig {
    /// Default tick period: 10ms
    pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);
    /// Default time slice: 5 ticks
    pub const DEFAULT_TIME_SLICE_TICKS: u32 = 5;
    /// Default kernel stack: 512 KiB
    pub const DEFAULT_KERNEL_STACK_SIZE: usize = 512 * 1024;
    /// Default user stack: 1 MiB
    pub const DEFAULT_USER_STACK_SIZE: usize = 1024 * 1024;
    /// Smallest kernel stack that can hold a first-entry image and a switch frame
    pub const MIN_STACK_SIZE: usize = 4096;

    /// Create default configuration
    pub fn new() -> Self {
        Self {
            tick_period: Self::DEFAULT_TICK_PERIOD,
            time_slice_ticks: Self::DEFAULT_TIME_SLICE_TICKS,
            kernel_stack_size: Self::DEFAULT_KERNEL_STACK_SIZE,
            user_stack_size: Self::DEFAULT_USER_STACK_SIZE,
            max_threads: 4096,
            max_processes: 1024,
            realtime_epoch: Duration::ZERO,
        }
    }

    /// Small stacks and tables, for constrained targets and tests
    pub fn simple() -> Self {
        Self {
            kernel_stack_size: 16 * 1024,
            user_stack_size: 16 * 1024,
            max_threads: 64,
            max_processes: 32,
            ..Self::new()
        }
    }

    /// Set the tick period
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Set the time slice length
    pub fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    /// Set the thread and process limits
    pub fn with_limits(mut self, max_threads: usize, max_processes: usize) -> Self {
        self.max_threads = max_threads;
        self.max_processes = max_processes;
        self
    }

    /// Set the boot wall-clock time
    pub fn with_realtime_epoch(mut self, epoch: Duration) -> Self {
        self.realtime_epoch = epoch;
        self
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> ExecResult<()> {
        if self.tick_period.is_zero() || self.time_slice_ticks == 0 {
            return Err(ExecError::InvalidArgument);
        }
        if self.kernel_stack_size < Self::MIN_STACK_SIZE || self.user_stack_size < Self::MIN_STACK_SIZE {
            return Err(ExecError::InvalidArgument);
        }
        if self.kernel_stack_size % STACK_ALIGN != 0 || self.user_stack_size % STACK_ALIGN != 0 {
            return Err(ExecError::InvalidArgument);
        }
        if self.max_threads == 0 || self.max_processes == 0 {
            return Err(ExecError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SchedulerConfig::new().validate().is_ok());
        assert!(SchedulerConfig::simple().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_slice() {
        let config = SchedulerConfig::simple().with_time_slice(0);
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
    }

    #[test]
    fn test_validate_rejects_tiny_stack() {
        let mut config = SchedulerConfig::simple();
        config.kernel_stack_size = 256;
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
    }

    #[test]
    fn test_validate_rejects_misaligned_stack() {
        let mut config = SchedulerConfig::simple();
        config.kernel_stack_size = 5000;
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));

        let mut config = SchedulerConfig::simple();
        config.user_stack_size = 16 * 1024 + 8;
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
    }
}
