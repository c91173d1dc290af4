//! Part delivery and single-worker mounting of doors and tires.

use std::sync::Arc;
use std::thread;

use crate::config::{RetryPolicy, Timings};
use crate::error::{AssemblyError, DeliveryError, PartKind};
use crate::pool::Worker;
use crate::types::{IdGenerator, PartId, WorkerId};

/// Source of physical parts. Implementations block for the delivery time.
pub trait Supplier: Send + Sync {
    /// Deliver one part; `attempt` starts at 1 and grows on retries.
    fn deliver(&self, part: PartKind, attempt: u32) -> Result<(), DeliveryError>;
}

/// Supplier that only waits out the configured delivery latency.
pub struct SimulatedSupplier {
    timings: Timings,
}

impl SimulatedSupplier {
    pub fn new(timings: Timings) -> Self {
        Self { timings }
    }
}

impl Supplier for SimulatedSupplier {
    fn deliver(&self, part: PartKind, _attempt: u32) -> Result<(), DeliveryError> {
        let latency = match part {
            PartKind::Frame => self.timings.frame_delivery(),
            _ => self.timings.part_delivery(),
        };
        thread::sleep(latency);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    id: PartId,
}

impl Frame {
    pub fn id(&self) -> PartId {
        self.id
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Door {
    id: PartId,
    frame: PartId,
    mounted_by: Option<WorkerId>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Tire {
    id: PartId,
    frame: PartId,
    mounted_by: Option<WorkerId>,
}

/// Hold `worker` for one part-assembly latency after checking the frame.
fn mount(
    part: PartKind,
    part_id: PartId,
    bound_frame: PartId,
    worker: &Worker,
    frame: &Frame,
    timings: &Timings,
) -> Result<WorkerId, AssemblyError> {
    if frame.id != bound_frame {
        return Err(AssemblyError::FrameMismatch {
            part,
            part_id,
            expected: bound_frame,
            found: frame.id,
        });
    }
    log::info!(
        "worker {} mounting {part} {part_id} on frame {}",
        worker.id(),
        frame.id
    );
    thread::sleep(timings.part_assembly());
    log::info!(
        "worker {} mounted {part} {part_id} on frame {}",
        worker.id(),
        frame.id
    );
    Ok(worker.id())
}

impl Door {
    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn frame_id(&self) -> PartId {
        self.frame
    }

    pub fn mounted_by(&self) -> Option<WorkerId> {
        self.mounted_by
    }

    /// Mount the door with an already-acquired worker.
    pub fn assemble(
        &mut self,
        worker: &Worker,
        frame: &Frame,
        timings: &Timings,
    ) -> Result<(), AssemblyError> {
        let by = mount(PartKind::Door, self.id, self.frame, worker, frame, timings)?;
        self.mounted_by = Some(by);
        Ok(())
    }
}

impl Tire {
    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn frame_id(&self) -> PartId {
        self.frame
    }

    pub fn mounted_by(&self) -> Option<WorkerId> {
        self.mounted_by
    }

    /// Mount the tire with an already-acquired worker.
    pub fn assemble(
        &mut self,
        worker: &Worker,
        frame: &Frame,
        timings: &Timings,
    ) -> Result<(), AssemblyError> {
        let by = mount(PartKind::Tire, self.id, self.frame, worker, frame, timings)?;
        self.mounted_by = Some(by);
        Ok(())
    }
}

/// Produces parts through a supplier, retrying transient failures.
pub struct PartFactory {
    supplier: Arc<dyn Supplier>,
    ids: IdGenerator,
    retry: RetryPolicy,
}

impl PartFactory {
    pub fn new(supplier: Arc<dyn Supplier>, retry: RetryPolicy) -> Self {
        Self {
            supplier,
            ids: IdGenerator::new(),
            retry,
        }
    }

    /// Id source shared with car assembly.
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    fn deliver(&self, part: PartKind, id: PartId) -> Result<(), DeliveryError> {
        log::info!("{part} {id} in delivery");
        let mut attempt = 1;
        loop {
            match self.supplier.deliver(part, attempt) {
                Ok(()) => {
                    log::info!("{part} {id} delivered");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(DeliveryError::RetriesExhausted {
                            part,
                            attempts: attempt,
                        });
                    }
                    let backoff = self.retry.backoff_for(attempt);
                    log::warn!("{part} {id} attempt {attempt} failed ({err}), retrying in {backoff:?}");
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn frame(&self) -> Result<Frame, DeliveryError> {
        let id = self.ids.next_id();
        self.deliver(PartKind::Frame, id)?;
        Ok(Frame { id })
    }

    /// Deliver a door bound to `frame`; it still needs `Door::assemble`.
    pub fn door(&self, frame: &Frame) -> Result<Door, DeliveryError> {
        let id = self.ids.next_id();
        self.deliver(PartKind::Door, id)?;
        Ok(Door {
            id,
            frame: frame.id,
            mounted_by: None,
        })
    }

    /// Deliver a tire bound to `frame`; it still needs `Tire::assemble`.
    pub fn tire(&self, frame: &Frame) -> Result<Tire, DeliveryError> {
        let id = self.ids.next_id();
        self.deliver(PartKind::Tire, id)?;
        Ok(Tire {
            id,
            frame: frame.id,
            mounted_by: None,
        })
    }
}
