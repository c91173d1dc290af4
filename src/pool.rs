//! Worker registry with exclusive, blocking acquisition.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::AcquireMode;
use crate::types::{PoolId, WorkerId};

/// Exclusive handle to a worker, valid until handed back to its pool.
#[derive(Debug, PartialEq, Eq)]
pub struct Worker {
    id: WorkerId,
    pool: PoolId,
}

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    busy: bool,
    acquisitions: u64,
}

/// Fixed set of workers; `acquire` waits until the requested one is free.
pub struct WorkerPool {
    id: PoolId,
    mode: AcquireMode,
    poll: Duration,
    workers: Mutex<HashMap<WorkerId, WorkerState>>,
    available: Condvar,
}

impl WorkerPool {
    /// Build a pool holding exactly `ids`, all free.
    pub fn new(ids: impl IntoIterator<Item = WorkerId>, mode: AcquireMode, poll: Duration) -> Self {
        let workers = ids
            .into_iter()
            .map(|id| (id, WorkerState::default()))
            .collect();
        Self {
            id: PoolId::new(),
            mode,
            poll,
            workers: Mutex::new(workers),
            available: Condvar::new(),
        }
    }

    /// Pool with workers `1..=count`.
    pub fn with_workers(count: usize, mode: AcquireMode, poll: Duration) -> Self {
        Self::new(1..=count as WorkerId, mode, poll)
    }

    /// Block until worker `id` is free, then mark it busy and hand it out.
    ///
    /// Never fails: an id the pool does not know waits forever, like a
    /// worker that is never released.
    pub fn acquire(&self, id: WorkerId) -> Worker {
        let mut guard = self.workers.lock().expect("worker pool mutex poisoned");
        loop {
            if let Some(state) = guard.get_mut(&id) {
                if !state.busy {
                    state.busy = true;
                    state.acquisitions += 1;
                    log::debug!("acquired worker {id}");
                    return Worker { id, pool: self.id };
                }
            }
            match self.mode {
                AcquireMode::Notify => {
                    log::debug!("worker {id} busy, waiting for release");
                    // Wait releases the lock and re-acquires it before returning.
                    guard = self.available.wait(guard).expect("condvar wait failed");
                }
                AcquireMode::Poll => {
                    drop(guard);
                    log::debug!("worker {id} busy, retrying in {:?}", self.poll);
                    if self.poll.is_zero() {
                        thread::yield_now();
                    } else {
                        thread::sleep(self.poll);
                    }
                    guard = self.workers.lock().expect("worker pool mutex poisoned");
                }
            }
        }
    }

    /// Return a worker to the pool and wake any waiters.
    ///
    /// Returns `false` and leaves the pool untouched when the handle was issued
    /// by another pool or the worker is not marked busy.
    pub fn release(&self, worker: Worker) -> bool {
        let mut guard = self.workers.lock().expect("worker pool mutex poisoned");
        let id = worker.id;
        if worker.pool != self.id {
            if !cfg!(debug_assertions) {
                eprintln!("[POOL] release of foreign worker: worker={id} pool={}", worker.pool);
            }
            debug_assert!(false, "worker release into foreign pool: worker={id}");
            return false;
        }
        match guard.get_mut(&id) {
            Some(state) if state.busy => {
                state.busy = false;
                log::debug!("released worker {id}");
                self.available.notify_all();
                true
            }
            _ => {
                if !cfg!(debug_assertions) {
                    eprintln!("[POOL] release of idle worker: worker={id}");
                }
                debug_assert!(false, "worker release while idle: worker={id}");
                false
            }
        }
    }

    pub fn is_busy(&self, id: WorkerId) -> bool {
        let guard = self.workers.lock().expect("worker pool mutex poisoned");
        guard.get(&id).is_some_and(|state| state.busy)
    }

    pub fn busy_workers(&self) -> HashSet<WorkerId> {
        let guard = self.workers.lock().expect("worker pool mutex poisoned");
        guard
            .iter()
            .filter(|(_, state)| state.busy)
            .map(|(&id, _)| id)
            .collect()
    }

    /// All worker ids, ascending.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let guard = self.workers.lock().expect("worker pool mutex poisoned");
        let mut ids: Vec<WorkerId> = guard.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// How many times worker `id` has been handed out.
    pub fn acquisitions(&self, id: WorkerId) -> u64 {
        let guard = self.workers.lock().expect("worker pool mutex poisoned");
        guard.get(&id).map_or(0, |state| state.acquisitions)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let guard = self.workers.lock().expect("worker pool mutex poisoned");
        guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::time::Instant;

    fn worker_is_exclusive_under_contention(mode: AcquireMode) {
        let pool = Arc::new(WorkerPool::with_workers(1, mode, Duration::from_millis(2)));
        let contenders = 6;
        let barrier = Arc::new(Barrier::new(contenders));
        let holders = Arc::new(AtomicUsize::new(0));
        let violation = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..contenders {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            let holders = Arc::clone(&holders);
            let violation = Arc::clone(&violation);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let worker = pool.acquire(1);
                if holders.fetch_add(1, Ordering::SeqCst) + 1 > 1 {
                    violation.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(10));
                holders.fetch_sub(1, Ordering::SeqCst);
                assert!(pool.release(worker));
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        assert!(!violation.load(Ordering::SeqCst));
        assert_eq!(pool.acquisitions(1), contenders as u64);
        assert!(pool.busy_workers().is_empty());
    }

    #[test]
    fn notify_mode_is_exclusive() {
        worker_is_exclusive_under_contention(AcquireMode::Notify);
    }

    #[test]
    fn poll_mode_is_exclusive() {
        worker_is_exclusive_under_contention(AcquireMode::Poll);
    }

    #[test]
    fn free_workers_are_acquired_without_waiting() {
        let pool = WorkerPool::with_workers(5, AcquireMode::Poll, Duration::from_secs(1));
        let start = Instant::now();
        let first = pool.acquire(1);
        let second = pool.acquire(2);
        // A single poll interval would already take a full second.
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(pool.busy_workers(), HashSet::from([1, 2]));
        assert!(pool.release(first));
        assert!(pool.release(second));
        assert!(!pool.is_busy(1));
    }

    #[test]
    fn second_request_for_single_worker_blocks_until_release() {
        let pool = Arc::new(WorkerPool::with_workers(1, AcquireMode::Notify, Duration::ZERO));
        let first = pool.acquire(1);
        let (tx, rx) = mpsc::channel();

        let pool_clone = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            let second = pool_clone.acquire(1);
            tx.send(second.id()).expect("send worker id");
            assert!(pool_clone.release(second));
        });

        // Still held by the first caller, so nothing arrives.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(pool.release(first));
        let id = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("blocked acquire never woke");
        assert_eq!(id, 1);
        handle.join().expect("waiting thread panicked");
        assert!(!pool.is_busy(1));
    }

    #[test]
    fn worker_ids_are_sorted_and_counted() {
        let pool = WorkerPool::new([4, 2, 9], AcquireMode::Notify, Duration::ZERO);
        assert_eq!(pool.worker_ids(), vec![2, 4, 9]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.acquisitions(4), 0);
        assert!(!pool.is_busy(7));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "worker release into foreign pool")]
    fn release_into_foreign_pool_panics_in_debug() {
        let home = WorkerPool::with_workers(2, AcquireMode::Notify, Duration::ZERO);
        let other = WorkerPool::with_workers(2, AcquireMode::Notify, Duration::ZERO);
        let worker = home.acquire(1);
        let _ = other.release(worker);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn release_into_foreign_pool_fails_and_keeps_state() {
        let home = WorkerPool::with_workers(2, AcquireMode::Notify, Duration::ZERO);
        let other = WorkerPool::with_workers(2, AcquireMode::Notify, Duration::ZERO);
        let worker = home.acquire(1);
        assert!(!other.release(worker));
        assert!(home.is_busy(1));
        assert!(!other.is_busy(1));
    }
}
