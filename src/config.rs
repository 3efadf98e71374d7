//! # Scheduler Configuration
//!
//! Compile-time constants bound every table the scheduler owns; nothing is
//! allocated at runtime. [`KernelConfig`] carries the switches that may differ
//! between boards built from the same image (core count, time slicing, ...).

use crate::error::{Error, Result};

/// Maximum number of tasks the system can manage simultaneously.
/// This bounds the TCB arena and every ready queue.
pub const MAX_TASKS: usize = 16;

/// Number of distinct priority levels. Valid priorities are
/// `0..MAX_PRIORITIES`, higher = more urgent.
pub const MAX_PRIORITIES: usize = 16;

/// Upper bound on the number of processor cores. The run table is sized by
/// this; [`KernelConfig::num_cores`] selects how many are actually used.
pub const MAX_CORES: usize = 8;

/// Tick frequency in Hz. Determines the length of one time unit.
pub const TICK_HZ: u32 = 1000;

/// Default time slice in ticks. A task running at a priority level shared
/// with other ready tasks is rotated out after this many ticks, unless its
/// own `time_slice` overrides it.
pub const DEFAULT_TIME_SLICE: u32 = 1;

/// Converts milliseconds to ticks, rounding down, never below one tick for a
/// non-zero duration.
pub const fn ms_to_ticks(ms: u32) -> u64 {
    let ticks = (ms as u64 * TICK_HZ as u64) / 1000;
    if ticks == 0 && ms > 0 {
        1
    } else {
        ticks
    }
}

/// Runtime scheduler options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of cores that take part in scheduling, `1..=MAX_CORES`.
    pub num_cores: usize,
    /// When set, a newly ready higher-priority task takes a core at the
    /// very next evaluation. When clear, running tasks are only replaced at
    /// voluntary points (yield, block, delete, suspend).
    pub preemption: bool,
    /// Round-robin rotation of equal-priority tasks on tick.
    pub time_slicing: bool,
    /// When clear, only tasks of the single highest running priority may
    /// occupy cores at the same time; remaining cores idle.
    pub run_multiple_priorities: bool,
    /// When clear, per-task core masks are ignored.
    pub core_affinity: bool,
}

impl KernelConfig {
    /// Configuration for `num_cores` cores with every feature enabled.
    pub const fn new(num_cores: usize) -> Self {
        Self {
            num_cores,
            preemption: true,
            time_slicing: true,
            run_multiple_priorities: true,
            core_affinity: true,
        }
    }

    pub const fn with_preemption(mut self, on: bool) -> Self {
        self.preemption = on;
        self
    }

    pub const fn with_time_slicing(mut self, on: bool) -> Self {
        self.time_slicing = on;
        self
    }

    pub const fn with_multiple_priorities(mut self, on: bool) -> Self {
        self.run_multiple_priorities = on;
        self
    }

    pub const fn with_core_affinity(mut self, on: bool) -> Self {
        self.core_affinity = on;
        self
    }

    /// Checks the core count against the compile-time table size.
    pub fn validate(&self) -> Result<()> {
        if self.num_cores == 0 || self.num_cores > MAX_CORES {
            return Err(Error::ContractViolation);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
