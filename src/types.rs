//! Shared identifiers used across the assembly line.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Stable identifier of a worker, fixed when the pool is built.
pub type WorkerId = u64;
/// Identifier of a frame, door, tire or car.
pub type PartId = u64;
/// Index of a build cycle within one run.
pub type CycleId = u64;

/// Identity of the pool that issued a worker handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(Uuid);

impl PoolId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source shared by every part built during a run.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Start handing out ids at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next unused id; unique for the lifetime of the generator.
    pub fn next_id(&self) -> PartId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = Arc::new(IdGenerator::new());
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ids = Arc::clone(&ids);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    let id = ids.next_id();
                    assert!(seen.lock().expect("seen mutex poisoned").insert(id));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("id thread panicked");
        }
        assert_eq!(seen.lock().expect("seen mutex poisoned").len(), 1000);
    }

    #[test]
    fn pool_ids_differ() {
        assert_ne!(PoolId::new(), PoolId::new());
    }
}
