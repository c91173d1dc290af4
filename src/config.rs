//! Timing knobs and run configuration for the assembly line.

use std::time::Duration;

use crate::error::ConfigError;

/// Step latencies, expressed as multiples of a single time unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Wall-clock length of one simulated time unit.
    pub unit: Duration,
    pub frame_delivery: u32,
    pub part_delivery: u32,
    pub part_assembly: u32,
    pub car_assembly: u32,
    /// Retry interval for `AcquireMode::Poll`.
    pub acquire_poll: u32,
}

impl Timings {
    /// Default step lengths with a custom unit.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn units(&self, count: u32) -> Duration {
        self.unit * count
    }

    pub fn frame_delivery(&self) -> Duration {
        self.units(self.frame_delivery)
    }

    pub fn part_delivery(&self) -> Duration {
        self.units(self.part_delivery)
    }

    pub fn part_assembly(&self) -> Duration {
        self.units(self.part_assembly)
    }

    pub fn car_assembly(&self) -> Duration {
        self.units(self.car_assembly)
    }

    pub fn acquire_poll(&self) -> Duration {
        self.units(self.acquire_poll)
    }

    /// Express a wall-clock span in (fractional) time units.
    pub fn to_units(&self, elapsed: Duration) -> f64 {
        if self.unit.is_zero() {
            return 0.0;
        }
        elapsed.as_secs_f64() / self.unit.as_secs_f64()
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            frame_delivery: 1,
            part_delivery: 1,
            part_assembly: 1,
            car_assembly: 5,
            acquire_poll: 1,
        }
    }
}

/// How a blocked acquisition waits for its worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireMode {
    /// Sleep a fixed interval and re-check.
    Poll,
    /// Park on the pool's condition variable until a release wakes us.
    Notify,
}

/// How the orchestrator schedules the steps of a build cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Concurrent,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Concurrent => "concurrent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sequential" | "seq" => Some(Strategy::Sequential),
            "concurrent" | "conc" => Some(Strategy::Concurrent),
            _ => None,
        }
    }
}

/// How a line picks the two workers for each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrewAssignment {
    RoundRobin,
    /// Two distinct random workers; seeded runs are reproducible.
    Random { seed: Option<u64> },
}

impl CrewAssignment {
    /// Accepts `roundrobin`, `random` or `random:<seed>`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.split_once(':') {
            Some(("random", seed)) => seed
                .parse()
                .ok()
                .map(|seed| CrewAssignment::Random { seed: Some(seed) }),
            Some(_) => None,
            None => match value {
                "roundrobin" | "rr" => Some(CrewAssignment::RoundRobin),
                "random" => Some(CrewAssignment::Random { seed: None }),
                _ => None,
            },
        }
    }
}

/// Retry behavior for part deliveries that fail transiently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base backoff, doubled after every failed attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt` failures (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff * (1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(5),
        }
    }
}

/// Full configuration of one simulation run.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Pool size; workers get ids `1..=workers`.
    pub workers: usize,
    /// Number of cars to build.
    pub cycles: usize,
    /// Parallel assembly lines (concurrent strategy only).
    pub lines: usize,
    pub strategy: Strategy,
    pub crew: CrewAssignment,
    pub acquire_mode: AcquireMode,
    pub timings: Timings,
    pub retry: RetryPolicy,
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 2 {
            return Err(ConfigError::TooFewWorkers {
                workers: self.workers,
            });
        }
        if self.lines == 0 {
            return Err(ConfigError::NoLines);
        }
        if self.lines.checked_mul(2).is_none_or(|needed| needed > self.workers) {
            return Err(ConfigError::TooManyLines {
                lines: self.lines,
                workers: self.workers,
            });
        }
        if self.timings.unit.is_zero() {
            return Err(ConfigError::ZeroTimeUnit);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoDeliveryAttempts);
        }
        Ok(())
    }

    /// Lines actually used; the sequential strategy always runs one.
    pub fn effective_lines(&self) -> usize {
        match self.strategy {
            Strategy::Sequential => 1,
            Strategy::Concurrent => self.lines,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            cycles: 5,
            lines: 1,
            strategy: Strategy::Concurrent,
            crew: CrewAssignment::RoundRobin,
            acquire_mode: AcquireMode::Notify,
            timings: Timings::default(),
            retry: RetryPolicy::default(),
        }
    }
}
