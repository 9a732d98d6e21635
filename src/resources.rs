//! Resource sampling and the two-tier poll interval policy.
//!
//! Between cycles the poll loop samples CPU and memory utilization and picks
//! the next sleep: the baseline interval while both stay under the high-water
//! mark, the backoff interval otherwise.

use std::time::Duration;

use serde::Serialize;
use sysinfo::System;

/// Sleep between cycles when the host is not under pressure.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(60);

/// Sleep between cycles when CPU or memory is at or above the high-water mark.
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_secs(120);

/// Utilization percentage at which the loop backs off.
pub const DEFAULT_HIGH_WATER_PERCENT: f32 = 80.0;

/// One utilization measurement, both values in percent (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl ResourceSample {
    /// The higher of the two utilization figures.
    pub fn peak(&self) -> f32 {
        self.cpu_percent.max(self.memory_percent)
    }
}

/// Source of utilization samples.
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Host-wide probe backed by `sysinfo`.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first reading.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        ResourceSample {
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
        }
    }
}

/// Probe that always reports the same sample. Useful when sampling is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub ResourceSample);

impl ResourceProbe for FixedProbe {
    fn sample(&mut self) -> ResourceSample {
        self.0
    }
}

/// Two-tier backpressure policy for the poll interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalPolicy {
    pub base: Duration,
    pub backoff: Duration,
    pub high_water_percent: f32,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_INTERVAL,
            backoff: DEFAULT_BACKOFF_INTERVAL,
            high_water_percent: DEFAULT_HIGH_WATER_PERCENT,
        }
    }
}

impl IntervalPolicy {
    /// Whether the sample counts as resource pressure.
    pub fn under_pressure(&self, sample: &ResourceSample) -> bool {
        sample.peak() >= self.high_water_percent
    }

    /// Interval to sleep before the next cycle.
    pub fn next_interval(&self, sample: &ResourceSample) -> Duration {
        if self.under_pressure(sample) {
            self.backoff
        } else {
            self.base
        }
    }
}
