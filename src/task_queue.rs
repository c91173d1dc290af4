//! Order intake for the assembly lines.
//!
//! Lines are started first and park in [`OrderQueue::take`]; the run thread
//! then submits one [`BuildOrder`] per car and finishes intake, which lets
//! every line drain what is left and exit.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::types::CycleId;

/// One car to build, stamped with when it entered the queue.
#[derive(Clone, Copy, Debug)]
pub struct BuildOrder {
    pub cycle: CycleId,
    queued_at: Instant,
}

impl BuildOrder {
    /// Time the order spent waiting for a free line.
    pub fn waited(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// Submitted after `finish`; carries the rejected cycle.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("order intake closed, cycle {0} rejected")]
pub struct IntakeClosed(pub CycleId);

struct Intake {
    orders: VecDeque<BuildOrder>,
    finished: bool,
    submitted: usize,
}

pub struct OrderQueue {
    intake: Mutex<Intake>,
    ready: Condvar,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self {
            intake: Mutex::new(Intake {
                orders: VecDeque::new(),
                finished: false,
                submitted: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue cycle `cycle` and wake one idle line.
    pub fn submit(&self, cycle: CycleId) -> Result<(), IntakeClosed> {
        let mut intake = self.intake.lock().expect("order queue mutex poisoned");
        if intake.finished {
            return Err(IntakeClosed(cycle));
        }
        intake.orders.push_back(BuildOrder {
            cycle,
            queued_at: Instant::now(),
        });
        intake.submitted += 1;
        self.ready.notify_one();
        Ok(())
    }

    /// Next order in submission order; `None` once intake is finished and drained.
    pub fn take(&self) -> Option<BuildOrder> {
        let mut intake = self.intake.lock().expect("order queue mutex poisoned");
        loop {
            if let Some(order) = intake.orders.pop_front() {
                return Some(order);
            }
            if intake.finished {
                return None;
            }
            intake = self.ready.wait(intake).expect("condvar wait failed");
        }
    }

    /// Stop accepting orders and wake every parked line.
    pub fn finish(&self) {
        let mut intake = self.intake.lock().expect("order queue mutex poisoned");
        intake.finished = true;
        self.ready.notify_all();
    }

    /// Orders submitted but not yet taken.
    pub fn pending(&self) -> usize {
        let intake = self.intake.lock().expect("order queue mutex poisoned");
        intake.orders.len()
    }

    pub fn submitted(&self) -> usize {
        let intake = self.intake.lock().expect("order queue mutex poisoned");
        intake.submitted
    }
}
