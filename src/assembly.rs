//! Final car assembly from a frame, a door and a tire.

use std::thread;

use crate::config::Timings;
use crate::error::{AssemblyError, PartKind};
use crate::parts::{Door, Frame, Tire};
use crate::pool::Worker;
use crate::types::{IdGenerator, PartId, WorkerId};

/// A finished car. Owns the parts it was built from.
#[derive(Debug)]
pub struct Car {
    id: PartId,
    frame: Frame,
    door: Door,
    tire: Tire,
    crew: (WorkerId, WorkerId),
}

impl Car {
    /// Assemble a car with two already-acquired workers.
    ///
    /// Door and tire must be mounted on `frame`. Both workers are held for
    /// the car-assembly latency; releasing them is the caller's job.
    pub fn assemble(
        worker1: &Worker,
        worker2: &Worker,
        frame: Frame,
        door: Door,
        tire: Tire,
        ids: &IdGenerator,
        timings: &Timings,
    ) -> Result<Car, AssemblyError> {
        if worker1.id() == worker2.id() {
            return Err(AssemblyError::SameWorker {
                worker: worker1.id(),
            });
        }
        if door.frame_id() != frame.id() {
            return Err(AssemblyError::FrameMismatch {
                part: PartKind::Door,
                part_id: door.id(),
                expected: door.frame_id(),
                found: frame.id(),
            });
        }
        if tire.frame_id() != frame.id() {
            return Err(AssemblyError::FrameMismatch {
                part: PartKind::Tire,
                part_id: tire.id(),
                expected: tire.frame_id(),
                found: frame.id(),
            });
        }
        if door.mounted_by().is_none() {
            return Err(AssemblyError::NotMounted {
                part: PartKind::Door,
                part_id: door.id(),
            });
        }
        if tire.mounted_by().is_none() {
            return Err(AssemblyError::NotMounted {
                part: PartKind::Tire,
                part_id: tire.id(),
            });
        }

        let id = ids.next_id();
        log::info!(
            "workers {} and {} assembling car {id} from frame {}, door {}, tire {}",
            worker1.id(),
            worker2.id(),
            frame.id(),
            door.id(),
            tire.id()
        );
        thread::sleep(timings.car_assembly());
        log::info!(
            "workers {} and {} finished car {id}",
            worker1.id(),
            worker2.id()
        );

        Ok(Car {
            id,
            frame,
            door,
            tire,
            crew: (worker1.id(), worker2.id()),
        })
    }

    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn door(&self) -> &Door {
        &self.door
    }

    pub fn tire(&self) -> &Tire {
        &self.tire
    }

    /// Workers that held the car-assembly step.
    pub fn crew(&self) -> (WorkerId, WorkerId) {
        self.crew
    }

    /// `(frame, door, tire)` ids.
    pub fn part_ids(&self) -> (PartId, PartId, PartId) {
        (self.frame.id(), self.door.id(), self.tire.id())
    }
}
