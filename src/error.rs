//! Error types for configuration, delivery and assembly failures.

use crate::types::{PartId, WorkerId};

/// Which kind of part a step deals with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartKind {
    Frame,
    Door,
    Tire,
}

impl std::fmt::Display for PartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PartKind::Frame => "frame",
            PartKind::Door => "door",
            PartKind::Tire => "tire",
        };
        f.write_str(name)
    }
}

/// Rejected simulation settings; checked before any worker is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least 2 workers are required, got {workers}")]
    TooFewWorkers { workers: usize },

    #[error("at least one assembly line is required")]
    NoLines,

    #[error("{lines} lines need two workers each, pool has {workers}")]
    TooManyLines { lines: usize, workers: usize },

    #[error("time unit must be non-zero")]
    ZeroTimeUnit,

    #[error("retry policy must allow at least one delivery attempt")]
    NoDeliveryAttempts,
}

/// Failure reported by a part supplier.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("transient {part} delivery failure: {reason}")]
    Transient { part: PartKind, reason: String },

    #[error("fatal {part} delivery failure: {reason}")]
    Fatal { part: PartKind, reason: String },

    #[error("{part} delivery failed after {attempts} attempts")]
    RetriesExhausted { part: PartKind, attempts: u32 },
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }
}

/// Broken preconditions of an assembly step.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("{part} {part_id} belongs to frame {expected}, not frame {found}")]
    FrameMismatch {
        part: PartKind,
        part_id: PartId,
        expected: PartId,
        found: PartId,
    },

    #[error("{part} {part_id} has not been mounted yet")]
    NotMounted { part: PartKind, part_id: PartId },

    #[error("worker {worker} cannot fill both car assembly slots")]
    SameWorker { worker: WorkerId },
}

/// Why a single build cycle was aborted.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("step {step} panicked")]
    StepPanicked { step: String },
}
