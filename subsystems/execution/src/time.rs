//! # Clocks
//!
//! Kernel time is counted in timer ticks. The monotonic clock starts at
//! zero at boot; the realtime clock is the monotonic clock plus the
//! wall-clock offset recorded at boot (or set later).

use crate::{ExecError, ExecResult};
use core::time::Duration;

/// Clock selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClockId {
    /// Wall-clock time, can be set
    Realtime = 0,
    /// Time since boot, never goes backwards
    Monotonic = 1,
}

impl ClockId {
    /// Decode a raw clock id from a syscall argument
    pub fn from_raw(raw: i32) -> ExecResult<Self> {
        match raw {
            0 => Ok(Self::Realtime),
            1 => Ok(Self::Monotonic),
            _ => Err(ExecError::InvalidArgument),
        }
    }
}

/// Tick-driven time source
#[derive(Debug, Clone)]
pub struct Timekeeper {
    period: Duration,
    ticks: u64,
    monotonic: Duration,
    realtime_offset: Duration,
}

impl Timekeeper {
    /// Clocks advancing by `period` per tick
    pub fn new(period: Duration, realtime_epoch: Duration) -> Self {
        Self {
            period,
            ticks: 0,
            monotonic: Duration::ZERO,
            realtime_offset: realtime_epoch,
        }
    }

    /// Account one timer tick
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.monotonic += self.period;
    }

    /// Ticks since boot
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Current time on `clock`
    pub fn now(&self, clock: ClockId) -> Duration {
        match clock {
            ClockId::Monotonic => self.monotonic,
            ClockId::Realtime => self.realtime_offset + self.monotonic,
        }
    }

    /// Set the realtime clock; the monotonic clock is unaffected
    pub fn set_realtime(&mut self, now: Duration) {
        self.realtime_offset = now.saturating_sub(self.monotonic);
    }
}
