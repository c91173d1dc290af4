//! Stage tracking for a single build cycle.

use crate::types::CycleId;

/// Stages of a build cycle, in the only order they may be visited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CycleStage {
    Pending,
    FrameReady,
    PartsReady,
    Assembled,
    Released,
}

impl CycleStage {
    fn successor(self) -> Option<CycleStage> {
        match self {
            CycleStage::Pending => Some(CycleStage::FrameReady),
            CycleStage::FrameReady => Some(CycleStage::PartsReady),
            CycleStage::PartsReady => Some(CycleStage::Assembled),
            CycleStage::Assembled => Some(CycleStage::Released),
            CycleStage::Released => None,
        }
    }
}

/// Record of the stages a cycle went through.
#[derive(Clone, Debug)]
pub struct CycleTrace {
    cycle: CycleId,
    stages: Vec<CycleStage>,
    aborted: bool,
}

impl CycleTrace {
    pub fn new(cycle: CycleId) -> Self {
        Self {
            cycle,
            stages: vec![CycleStage::Pending],
            aborted: false,
        }
    }

    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    pub fn stage(&self) -> CycleStage {
        // Never empty: starts at Pending.
        self.stages.last().copied().unwrap_or(CycleStage::Pending)
    }

    /// Move to `next`; only the direct successor is accepted.
    pub fn advance(&mut self, next: CycleStage) -> bool {
        let current = self.stage();
        if current.successor() != Some(next) {
            debug_assert!(
                false,
                "cycle {} skipped from {current:?} to {next:?}",
                self.cycle
            );
            return false;
        }
        log::debug!("cycle {} {current:?} -> {next:?}", self.cycle);
        self.stages.push(next);
        true
    }

    /// Jump to `Released` after a failed step; workers are already back.
    pub fn abort(&mut self) {
        self.aborted = true;
        if self.stage() != CycleStage::Released {
            self.stages.push(CycleStage::Released);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Went through every stage in order and was not aborted.
    pub fn is_complete(&self) -> bool {
        !self.aborted
            && self.stages
                == [
                    CycleStage::Pending,
                    CycleStage::FrameReady,
                    CycleStage::PartsReady,
                    CycleStage::Assembled,
                    CycleStage::Released,
                ]
    }
}
