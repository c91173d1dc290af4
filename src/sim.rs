//! Build-cycle orchestration plus the demo, benchmark and stress runners.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::assembly::Car;
use crate::config::{AcquireMode, CrewAssignment, SimConfig, Strategy, Timings};
use crate::cycle::{CycleStage, CycleTrace};
use crate::error::{ConfigError, CycleError};
use crate::parts::{Door, Frame, PartFactory, SimulatedSupplier, Supplier, Tire};
use crate::pool::{Worker, WorkerPool};
use crate::task_queue::OrderQueue;
use crate::types::{CycleId, WorkerId};

// Demo defaults (small unit for quick CLI feedback).
const DEMO_UNIT_MS: u64 = 10;
const DEMO_CARS: usize = 5;
const DEMO_WORKERS: usize = 5;

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data; getrusage fills it in.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Per-worker hold counters; any counter above 1 is an exclusivity breach.
struct HoldMetrics {
    per_worker: Vec<AtomicUsize>,
    max_hold: AtomicUsize,
    violation: AtomicBool,
}

impl HoldMetrics {
    fn new(workers: usize) -> Self {
        // Worker ids are 1-based; index 0 is unused.
        Self {
            per_worker: (0..=workers).map(|_| AtomicUsize::new(0)).collect(),
            max_hold: AtomicUsize::new(0),
            violation: AtomicBool::new(false),
        }
    }

    fn enter(&self, worker: WorkerId) {
        let index = worker as usize;
        debug_assert!(index < self.per_worker.len(), "worker index out of range");
        let holders = self.per_worker[index].fetch_add(1, Ordering::SeqCst) + 1;
        if holders > 1 {
            self.violation.store(true, Ordering::SeqCst);
        }
        self.max_hold.fetch_max(holders, Ordering::SeqCst);
    }

    fn pre_release(&self, worker: WorkerId) {
        let prev = self.per_worker[worker as usize].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "hold counter underflow");
    }

    fn revert_pre_release(&self, worker: WorkerId) {
        self.per_worker[worker as usize].fetch_add(1, Ordering::SeqCst);
    }

    fn max_hold(&self) -> usize {
        self.max_hold.load(Ordering::SeqCst)
    }

    fn has_violation(&self) -> bool {
        self.violation.load(Ordering::SeqCst)
    }
}

/// Split worker ids into `lines` disjoint groups of at least two.
fn partition_crews(ids: &[WorkerId], lines: usize) -> Vec<Vec<WorkerId>> {
    let base = ids.len() / lines;
    let extra = ids.len() % lines;
    let mut groups = Vec::with_capacity(lines);
    let mut start = 0;
    for line in 0..lines {
        let size = base + usize::from(line < extra);
        groups.push(ids[start..start + size].to_vec());
        start += size;
    }
    groups
}

/// Picks the two workers of each cycle from one line's group.
struct CrewPlanner {
    group: Vec<WorkerId>,
    next: usize,
    rng: Option<StdRng>,
}

impl CrewPlanner {
    fn new(group: Vec<WorkerId>, assignment: CrewAssignment, line: usize) -> Self {
        debug_assert!(group.len() >= 2, "crew group needs two workers");
        let rng = match assignment {
            CrewAssignment::RoundRobin => None,
            CrewAssignment::Random { seed: Some(seed) } => {
                Some(StdRng::seed_from_u64(seed.wrapping_add(line as u64)))
            }
            CrewAssignment::Random { seed: None } => Some(StdRng::from_entropy()),
        };
        Self {
            group,
            next: 0,
            rng,
        }
    }

    fn next_crew(&mut self) -> (WorkerId, WorkerId) {
        let len = self.group.len();
        match self.rng.as_mut() {
            Some(rng) => {
                let picked = rand::seq::index::sample(rng, len, 2);
                (self.group[picked.index(0)], self.group[picked.index(1)])
            }
            None => {
                let first = (2 * self.next) % len;
                let second = (2 * self.next + 1) % len;
                self.next += 1;
                (self.group[first], self.group[second])
            }
        }
    }
}

fn spawn_step<'scope, 'env, T, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: String,
    step: F,
) -> thread::ScopedJoinHandle<'scope, T>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(name)
        .spawn_scoped(scope, step)
        .expect("failed to spawn step thread")
}

fn join_step<T>(handle: thread::ScopedJoinHandle<'_, T>) -> Result<T, CycleError> {
    let step = handle.thread().name().unwrap_or("unnamed").to_string();
    handle.join().map_err(|_| CycleError::StepPanicked { step })
}

/// Result of one build cycle.
struct CycleOutcome {
    trace: CycleTrace,
    result: Result<Car, CycleError>,
}

/// Everything a line needs while a run is in flight.
struct RunContext<'a> {
    sim: &'a Simulation,
    metrics: &'a HoldMetrics,
}

impl RunContext<'_> {
    fn acquire(&self, id: WorkerId) -> Worker {
        let worker = self.sim.pool.acquire(id);
        self.metrics.enter(id);
        worker
    }

    fn release(&self, worker: Worker) {
        let id = worker.id();
        self.metrics.pre_release(id);
        if !self.sim.pool.release(worker) {
            log::warn!("failed to release worker {id}");
            self.metrics.revert_pre_release(id);
        }
    }

    fn timings(&self) -> &Timings {
        &self.sim.config.timings
    }

    fn run_cycle(&self, cycle: CycleId, crew: (WorkerId, WorkerId)) -> CycleOutcome {
        log::info!("cycle {cycle} started with workers {} and {}", crew.0, crew.1);
        let mut trace = CycleTrace::new(cycle);
        let result = match self.sim.config.strategy {
            Strategy::Sequential => self.sequential_cycle(cycle, crew, &mut trace),
            Strategy::Concurrent => self.concurrent_cycle(cycle, crew, &mut trace),
        };
        match &result {
            Ok(car) => {
                trace.advance(CycleStage::Released);
                log::info!("cycle {cycle} finished car {} with crew {:?}", car.id(), car.crew());
            }
            Err(err) => {
                trace.abort();
                log::warn!("cycle {cycle} aborted: {err}");
            }
        }
        CycleOutcome { trace, result }
    }

    fn sequential_cycle(
        &self,
        cycle: CycleId,
        (a, b): (WorkerId, WorkerId),
        trace: &mut CycleTrace,
    ) -> Result<Car, CycleError> {
        let worker1 = self.acquire(a);
        let worker2 = self.acquire(b);
        // One step thread runs the whole chain so a panic is caught before release.
        let built = thread::scope(|s| {
            let steps = spawn_step(s, format!("cycle-{cycle}-steps"), || {
                self.sequential_steps(&worker1, &worker2, trace)
            });
            join_step(steps)
        })
        .and_then(|built| built);
        self.release(worker1);
        self.release(worker2);
        built
    }

    fn sequential_steps(
        &self,
        worker1: &Worker,
        worker2: &Worker,
        trace: &mut CycleTrace,
    ) -> Result<Car, CycleError> {
        let factory = &self.sim.factory;
        let timings = self.timings();
        let frame = factory.frame()?;
        trace.advance(CycleStage::FrameReady);
        let mut door = factory.door(&frame)?;
        door.assemble(worker1, &frame, timings)?;
        let mut tire = factory.tire(&frame)?;
        tire.assemble(worker2, &frame, timings)?;
        trace.advance(CycleStage::PartsReady);
        let car = Car::assemble(worker1, worker2, frame, door, tire, factory.ids(), timings)?;
        trace.advance(CycleStage::Assembled);
        Ok(car)
    }

    fn concurrent_cycle(
        &self,
        cycle: CycleId,
        (a, b): (WorkerId, WorkerId),
        trace: &mut CycleTrace,
    ) -> Result<Car, CycleError> {
        let (frame, worker1, worker2) = thread::scope(|s| {
            let frame = spawn_step(s, format!("cycle-{cycle}-frame"), || {
                self.sim.factory.frame()
            });
            let worker1 = spawn_step(s, format!("cycle-{cycle}-acquire-{a}"), || self.acquire(a));
            let worker2 = spawn_step(s, format!("cycle-{cycle}-acquire-{b}"), || self.acquire(b));
            (join_step(frame), join_step(worker1), join_step(worker2))
        });

        match (worker1, worker2) {
            (Ok(worker1), Ok(worker2)) => {
                let built = frame
                    .and_then(|delivered| delivered.map_err(CycleError::from))
                    .and_then(|frame| self.concurrent_steps(cycle, &worker1, &worker2, frame, trace));
                self.release(worker1);
                self.release(worker2);
                built
            }
            (worker1, worker2) => {
                let mut failure = None;
                for worker in [worker1, worker2] {
                    match worker {
                        Ok(worker) => self.release(worker),
                        Err(err) => failure = Some(err),
                    }
                }
                Err(failure.unwrap_or_else(|| CycleError::StepPanicked {
                    step: format!("cycle-{cycle}-acquire"),
                }))
            }
        }
    }

    fn concurrent_steps(
        &self,
        cycle: CycleId,
        worker1: &Worker,
        worker2: &Worker,
        frame: Frame,
        trace: &mut CycleTrace,
    ) -> Result<Car, CycleError> {
        trace.advance(CycleStage::FrameReady);
        let factory = &self.sim.factory;
        let timings = self.timings();

        let (door, tire) = thread::scope(|s| {
            let frame = &frame;
            let door = spawn_step(s, format!("cycle-{cycle}-door"), move || {
                let mut door: Door = factory.door(frame)?;
                door.assemble(worker1, frame, timings)?;
                Ok::<_, CycleError>(door)
            });
            let tire = spawn_step(s, format!("cycle-{cycle}-tire"), move || {
                let mut tire: Tire = factory.tire(frame)?;
                tire.assemble(worker2, frame, timings)?;
                Ok::<_, CycleError>(tire)
            });
            (join_step(door), join_step(tire))
        });
        let door = door.and_then(|door| door)?;
        let tire = tire.and_then(|tire| tire)?;
        trace.advance(CycleStage::PartsReady);

        let car = Car::assemble(worker1, worker2, frame, door, tire, factory.ids(), timings)?;
        trace.advance(CycleStage::Assembled);
        Ok(car)
    }
}

/// Outcome of a full N-cycle run.
#[derive(Debug)]
pub struct BuildReport {
    pub strategy: Strategy,
    pub lines: usize,
    /// Finished cars in cycle order.
    pub cars: Vec<Car>,
    pub failures: Vec<(CycleId, CycleError)>,
    pub traces: Vec<CycleTrace>,
    pub elapsed: Duration,
    pub elapsed_units: f64,
    pub max_hold: usize,
    pub hold_violation: bool,
}

impl BuildReport {
    /// Names of every broken run invariant; empty when the run is clean.
    pub fn violations(&self, cycles: usize) -> Vec<&'static str> {
        let mut found = Vec::new();
        if self.hold_violation || self.max_hold > 1 {
            found.push("hold_exclusivity");
        }
        if self.cars.len() + self.failures.len() != cycles {
            found.push("car_count");
        }
        let mut parts = HashSet::new();
        for car in &self.cars {
            let (frame, door, tire) = car.part_ids();
            if !(parts.insert(frame) && parts.insert(door) && parts.insert(tire)) {
                found.push("duplicate_parts");
                break;
            }
        }
        if self
            .cars
            .iter()
            .any(|car| car.door().frame_id() != car.frame().id() || car.tire().frame_id() != car.frame().id())
        {
            found.push("frame_mismatch");
        }
        if self
            .traces
            .iter()
            .any(|trace| !trace.is_aborted() && !trace.is_complete())
        {
            found.push("stage_order");
        }
        found
    }
}

/// One simulation run: owns its worker pool and part factory.
pub struct Simulation {
    config: SimConfig,
    pool: WorkerPool,
    factory: PartFactory,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        let supplier = Arc::new(SimulatedSupplier::new(config.timings.clone()));
        Self::with_supplier(config, supplier)
    }

    pub fn with_supplier(config: SimConfig, supplier: Arc<dyn Supplier>) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = WorkerPool::with_workers(
            config.workers,
            config.acquire_mode,
            config.timings.acquire_poll(),
        );
        let factory = PartFactory::new(supplier, config.retry.clone());
        Ok(Self {
            config,
            pool,
            factory,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Build `config.cycles` cars and report how it went.
    pub fn run(&self) -> BuildReport {
        let lines = self.config.effective_lines();
        let metrics = HoldMetrics::new(self.config.workers);
        let queue = OrderQueue::new();
        log::info!(
            "building {} cars, strategy={} lines={lines}",
            self.config.cycles,
            self.config.strategy.name()
        );

        let groups = partition_crews(&self.pool.worker_ids(), lines);
        let ctx = RunContext {
            sim: self,
            metrics: &metrics,
        };
        let start = Instant::now();
        let mut outcomes: Vec<CycleOutcome> = thread::scope(|s| {
            let mut handles = Vec::new();
            for (line, group) in groups.into_iter().enumerate() {
                let ctx = &ctx;
                let queue = &queue;
                let mut planner = CrewPlanner::new(group, self.config.crew, line);
                let handle = thread::Builder::new()
                    .name(format!("line-{line}"))
                    .spawn_scoped(s, move || {
                        let mut done = Vec::new();
                        while let Some(order) = queue.take() {
                            log::debug!("took cycle {} after {:?}", order.cycle, order.waited());
                            let crew = planner.next_crew();
                            done.push(ctx.run_cycle(order.cycle, crew));
                        }
                        done
                    })
                    .expect("failed to spawn line thread");
                handles.push(handle);
            }
            for cycle in 0..self.config.cycles {
                if let Err(err) = queue.submit(cycle as CycleId) {
                    log::warn!("{err}");
                }
            }
            queue.finish();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().expect("line thread panicked"))
                .collect()
        });
        let elapsed = start.elapsed();
        debug_assert_eq!(queue.pending(), 0, "lines left orders behind");
        debug_assert_eq!(queue.submitted(), self.config.cycles);
        outcomes.sort_by_key(|outcome| outcome.trace.cycle());

        let mut cars = Vec::new();
        let mut failures = Vec::new();
        let mut traces = Vec::new();
        for CycleOutcome { trace, result } in outcomes {
            match result {
                Ok(car) => cars.push(car),
                Err(err) => failures.push((trace.cycle(), err)),
            }
            traces.push(trace);
        }

        BuildReport {
            strategy: self.config.strategy,
            lines,
            cars,
            failures,
            traces,
            elapsed,
            elapsed_units: self.config.timings.to_units(elapsed),
            max_hold: metrics.max_hold(),
            hold_violation: metrics.has_violation(),
        }
    }
}

fn demo_config(strategy: Strategy, lines: usize, unit_ms: u64) -> SimConfig {
    SimConfig {
        workers: DEMO_WORKERS,
        cycles: DEMO_CARS,
        lines,
        strategy,
        timings: Timings::with_unit(Duration::from_millis(unit_ms)),
        ..SimConfig::default()
    }
}

/// Run the default demo: the same five cars built three ways.
pub fn run_demo(unit_ms: Option<u64>) {
    let unit_ms = unit_ms.unwrap_or(DEMO_UNIT_MS);
    if unit_ms == 0 {
        eprintln!("demo error: unit_ms must be > 0");
        return;
    }
    log::info!("[DEMO] start");

    let runs = [
        ("sequential", demo_config(Strategy::Sequential, 1, unit_ms)),
        ("concurrent", demo_config(Strategy::Concurrent, 1, unit_ms)),
        ("concurrent_x2", demo_config(Strategy::Concurrent, 2, unit_ms)),
    ];
    let mut rows = Vec::new();
    let mut violation = false;
    let mut busy_at_end = HashSet::new();
    for (label, config) in runs {
        let sim = match Simulation::new(config) {
            Ok(sim) => sim,
            Err(err) => {
                eprintln!("demo error: {err}");
                return;
            }
        };
        let report = sim.run();
        let broken = report.violations(sim.config().cycles);
        if !broken.is_empty() {
            log::warn!("[DEMO] {label} violations: {broken:?}");
            violation = true;
        }
        busy_at_end.extend(sim.pool().busy_workers());
        rows.push((label, report));
    }

    println!("DEMO SUMMARY");
    println!("workers={DEMO_WORKERS} cars_per_run={DEMO_CARS} unit_ms={unit_ms}");
    for (label, report) in &rows {
        println!(
            "{label}: cars_built={} failed_cycles={} elapsed_units={:.1} max_hold={}",
            report.cars.len(),
            report.failures.len(),
            report.elapsed_units,
            report.max_hold
        );
    }
    let total_cars: usize = rows.iter().map(|(_, report)| report.cars.len()).sum();
    println!("cars_built={total_cars}");
    println!("hold_violation={violation}");
    println!("busy_workers_at_end={busy_at_end:?}");
}

const CSV_HEADER: &str = "strategy,cars,workers,lines,unit_ms,elapsed_ms,elapsed_units,cars_per_s,cpu_user_s,cpu_sys_s,max_hold,hold_violation,failed_cycles";

/// Aggregated metrics from a single benchmark run.
struct BenchResult {
    config: SimConfig,
    report: BuildReport,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
}

impl BenchResult {
    fn csv_row(&self) -> String {
        let elapsed_ms = self.report.elapsed.as_secs_f64() * 1000.0;
        let throughput = if elapsed_ms > 0.0 {
            self.report.cars.len() as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        };
        let cpu_user = self
            .cpu_user_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        let cpu_sys = self
            .cpu_sys_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        format!(
            "{},{},{},{},{},{:.2},{:.2},{:.2},{},{},{},{},{}",
            self.report.strategy.name(),
            self.config.cycles,
            self.config.workers,
            self.report.lines,
            self.config.timings.unit.as_millis(),
            elapsed_ms,
            self.report.elapsed_units,
            throughput,
            cpu_user,
            cpu_sys,
            self.report.max_hold,
            self.report.hold_violation,
            self.report.failures.len()
        )
    }
}

fn benchmark_once(config: SimConfig) -> Result<BenchResult, ConfigError> {
    let sim = Simulation::new(config.clone())?;
    let cpu_start = cpu_times_seconds();
    let report = sim.run();
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    Ok(BenchResult {
        config,
        report,
        cpu_user_s,
        cpu_sys_s,
    })
}

fn report_bench_issues(result: &BenchResult, validate: bool) {
    for (cycle, err) in &result.report.failures {
        eprintln!("# warning,failed_cycle,{cycle},{err}");
    }
    if validate {
        for violation in result.report.violations(result.config.cycles) {
            eprintln!("# violation,{violation}");
        }
    }
}

/// Benchmark parameters; `None` keeps the default.
#[derive(Debug, Default)]
pub struct BenchArgs {
    pub cars: Option<usize>,
    pub workers: Option<usize>,
    pub unit_ms: Option<u64>,
    pub strategy: Option<Strategy>,
    pub lines: Option<usize>,
    pub acquire_mode: Option<AcquireMode>,
    pub crew: Option<CrewAssignment>,
    pub validate: bool,
}

/// Run a single benchmark with optional parameter overrides.
pub fn run_benchmark(args: BenchArgs) -> Result<(), ConfigError> {
    let defaults = SimConfig::default();
    let config = SimConfig {
        cycles: args.cars.unwrap_or(defaults.cycles),
        workers: args.workers.unwrap_or(defaults.workers),
        lines: args.lines.unwrap_or(defaults.lines),
        strategy: args.strategy.unwrap_or(defaults.strategy),
        acquire_mode: args.acquire_mode.unwrap_or(defaults.acquire_mode),
        crew: args.crew.unwrap_or(defaults.crew),
        timings: Timings::with_unit(Duration::from_millis(args.unit_ms.unwrap_or(DEMO_UNIT_MS))),
        ..defaults
    };
    let result = benchmark_once(config)?;
    println!("{CSV_HEADER}");
    println!("{}", result.csv_row());
    report_bench_issues(&result, args.validate);
    Ok(())
}

/// Sweep strategies, car counts and pool sizes; prints CSV.
pub fn run_stress(car_sets: Option<Vec<usize>>, worker_sets: Option<Vec<usize>>, unit_ms: Option<u64>) {
    let car_sets = car_sets.unwrap_or_else(|| vec![1, 5, 10]);
    let mut worker_sets = worker_sets.unwrap_or_else(|| vec![2, 4, 8]);
    let unit_ms = unit_ms.unwrap_or(2);
    if unit_ms == 0 {
        eprintln!("stress error: unit_ms must be > 0");
        return;
    }
    let before = worker_sets.len();
    worker_sets.retain(|&workers| workers >= 2);
    let dropped = before - worker_sets.len();
    if dropped > 0 {
        eprintln!("stress warning: ignored {dropped} worker set(s) < 2");
    }
    if worker_sets.is_empty() {
        eprintln!("stress error: workers must be >= 2");
        return;
    }

    println!("{CSV_HEADER}");
    for strategy in [Strategy::Sequential, Strategy::Concurrent] {
        for workers in worker_sets.iter().copied() {
            for cars in car_sets.iter().copied() {
                let config = SimConfig {
                    workers,
                    cycles: cars,
                    lines: (workers / 2).max(1),
                    strategy,
                    timings: Timings::with_unit(Duration::from_millis(unit_ms)),
                    ..SimConfig::default()
                };
                match benchmark_once(config) {
                    Ok(result) => {
                        println!("{}", result.csv_row());
                        report_bench_issues(&result, true);
                    }
                    Err(err) => eprintln!("stress error: {err}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::{DeliveryError, PartKind};
    use crate::parts::tests::FlakySupplier;
    use std::sync::{Mutex, OnceLock, Weak};

    /// Panics instead of delivering parts of one kind.
    struct PanickingSupplier(PartKind);

    impl Supplier for PanickingSupplier {
        fn deliver(&self, part: PartKind, _attempt: u32) -> Result<(), DeliveryError> {
            if part == self.0 {
                panic!("{part} truck crashed");
            }
            Ok(())
        }
    }

    /// Records which workers are busy whenever a frame is delivered.
    #[derive(Default)]
    struct CrewWatch {
        sim: OnceLock<Weak<Simulation>>,
        busy_at_frame: Mutex<Vec<HashSet<WorkerId>>>,
    }

    impl Supplier for CrewWatch {
        fn deliver(&self, part: PartKind, _attempt: u32) -> Result<(), DeliveryError> {
            if part == PartKind::Frame {
                if let Some(sim) = self.sim.get().and_then(Weak::upgrade) {
                    let busy = sim.pool().busy_workers();
                    self.busy_at_frame.lock().expect("watch mutex poisoned").push(busy);
                }
            }
            Ok(())
        }
    }

    fn config(strategy: Strategy, cycles: usize, unit_ms: u64) -> SimConfig {
        SimConfig {
            workers: 5,
            cycles,
            lines: 1,
            strategy,
            timings: Timings::with_unit(Duration::from_millis(unit_ms)),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            ..SimConfig::default()
        }
    }

    fn assert_clean(sim: &Simulation, report: &BuildReport) {
        assert!(report.violations(sim.config().cycles).is_empty(), "{:?}", report.violations(sim.config().cycles));
        assert!(!report.hold_violation);
        assert!(report.max_hold <= 1);
        assert!(sim.pool().busy_workers().is_empty());
    }

    #[test]
    fn builds_exactly_n_cars_with_distinct_parts() {
        for strategy in [Strategy::Sequential, Strategy::Concurrent] {
            let sim = Simulation::new(config(strategy, 4, 2)).expect("valid config");
            let report = sim.run();
            assert_eq!(report.cars.len(), 4);
            assert!(report.failures.is_empty());
            assert_clean(&sim, &report);

            let mut parts = HashSet::new();
            for car in &report.cars {
                let (frame, door, tire) = car.part_ids();
                assert!(parts.insert(frame) && parts.insert(door) && parts.insert(tire));
                assert_eq!(car.door().frame_id(), frame);
                assert_eq!(car.tire().frame_id(), frame);
            }
            assert!(report.traces.iter().all(CycleTrace::is_complete));
            // Two acquisitions per cycle, each released before the next.
            let handed_out: u64 = sim.pool().worker_ids().iter().map(|&id| sim.pool().acquisitions(id)).sum();
            assert_eq!(handed_out, 8);
        }
    }

    #[test]
    fn zero_cycles_builds_nothing() {
        let sim = Simulation::new(config(Strategy::Concurrent, 0, 2)).expect("valid config");
        let report = sim.run();
        assert!(report.cars.is_empty());
        assert!(report.traces.is_empty());
        assert_clean(&sim, &report);
    }

    #[test]
    fn concurrent_strategy_beats_sequential() {
        let sequential = Simulation::new(config(Strategy::Sequential, 5, 20)).expect("valid config");
        let concurrent = Simulation::new(config(Strategy::Concurrent, 5, 20)).expect("valid config");
        let slow = sequential.run();
        let fast = concurrent.run();
        assert_eq!(slow.cars.len(), 5);
        assert_eq!(fast.cars.len(), 5);
        // Sequential: 5 x (1 + 2 + 2 + 5) units, nothing overlaps.
        assert!(slow.elapsed_units >= 50.0, "sequential took {:.1}", slow.elapsed_units);
        // Concurrent: 5 x (1 + 2 + 5) units on the critical path.
        assert!(fast.elapsed_units < 50.0, "concurrent took {:.1}", fast.elapsed_units);
        assert!(fast.elapsed < slow.elapsed);
    }

    #[test]
    fn parallel_lines_overlap_cycles() {
        let sim = Simulation::new(SimConfig {
            lines: 2,
            ..config(Strategy::Concurrent, 5, 20)
        })
        .expect("valid config");
        let report = sim.run();
        assert_eq!(report.cars.len(), 5);
        assert_eq!(report.lines, 2);
        // A single line needs at least 40 units for five cars.
        assert!(report.elapsed_units < 40.0, "two lines took {:.1}", report.elapsed_units);
        assert_clean(&sim, &report);
    }

    #[test]
    fn random_crews_in_poll_mode_stay_exclusive() {
        let sim = Simulation::new(SimConfig {
            workers: 6,
            lines: 3,
            crew: CrewAssignment::Random { seed: Some(7) },
            acquire_mode: AcquireMode::Poll,
            ..config(Strategy::Concurrent, 9, 2)
        })
        .expect("valid config");
        let report = sim.run();
        assert_eq!(report.cars.len(), 9);
        assert_clean(&sim, &report);
        for car in &report.cars {
            let (a, b) = car.crew();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn fatal_delivery_aborts_only_its_cycle() {
        for strategy in [Strategy::Sequential, Strategy::Concurrent] {
            let supplier = Arc::new(FlakySupplier::new(PartKind::Door, 1, true));
            let sim = Simulation::with_supplier(config(strategy, 3, 2), supplier).expect("valid config");
            let report = sim.run();
            assert_eq!(report.cars.len(), 2);
            assert_eq!(report.failures.len(), 1);
            let (cycle, err) = &report.failures[0];
            assert_eq!(*cycle, 0);
            assert!(matches!(
                err,
                CycleError::Delivery(DeliveryError::Fatal { part: PartKind::Door, .. })
            ));
            assert!(report.traces[0].is_aborted());
            assert!(report.traces[1].is_complete());
            assert_clean(&sim, &report);
        }
    }

    #[test]
    fn panicking_step_aborts_its_cycle_and_frees_workers() {
        for strategy in [Strategy::Sequential, Strategy::Concurrent] {
            let supplier = Arc::new(PanickingSupplier(PartKind::Door));
            let sim = Simulation::with_supplier(config(strategy, 2, 2), supplier).expect("valid config");
            let report = sim.run();
            assert!(report.cars.is_empty());
            assert_eq!(report.failures.len(), 2);
            for (index, (cycle, err)) in report.failures.iter().enumerate() {
                assert_eq!(*cycle, index as CycleId);
                assert!(matches!(err, CycleError::StepPanicked { .. }), "{strategy:?}: {err}");
            }
            assert!(report.traces.iter().all(CycleTrace::is_aborted));
            assert_clean(&sim, &report);
        }
    }

    #[test]
    fn previous_crew_is_free_before_next_frame_arrives() {
        for strategy in [Strategy::Sequential, Strategy::Concurrent] {
            let watch = Arc::new(CrewWatch::default());
            let sim = Arc::new(
                Simulation::with_supplier(config(strategy, 4, 2), Arc::<CrewWatch>::clone(&watch)).expect("valid config"),
            );
            watch.sim.set(Arc::downgrade(&sim)).expect("simulation registered twice");
            let report = sim.run();
            assert_eq!(report.cars.len(), 4);
            assert_clean(&sim, &report);

            let seen = watch.busy_at_frame.lock().expect("watch mutex poisoned");
            assert_eq!(seen.len(), 4);
            for (cycle, busy) in seen.iter().enumerate() {
                let (a, b) = report.cars[cycle].crew();
                let crew = HashSet::from([a, b]);
                assert!(busy.is_subset(&crew), "{strategy:?} cycle {cycle}: {busy:?} busy, crew {crew:?}");
                if strategy == Strategy::Sequential {
                    // Both workers are held before the frame is ordered.
                    assert_eq!(*busy, crew);
                }
                if cycle > 0 {
                    let (prev_a, prev_b) = report.cars[cycle - 1].crew();
                    assert!(!busy.contains(&prev_a) && !busy.contains(&prev_b));
                }
            }
        }
    }

    #[test]
    fn transient_delivery_failures_are_absorbed() {
        let supplier = Arc::new(FlakySupplier::new(PartKind::Frame, 2, false));
        let sim = Simulation::with_supplier(config(Strategy::Concurrent, 2, 2), supplier)
            .expect("valid config");
        let report = sim.run();
        assert_eq!(report.cars.len(), 2);
        assert!(report.failures.is_empty());
        assert_clean(&sim, &report);
    }

    #[test]
    fn rejects_pool_too_small_for_a_crew() {
        let result = Simulation::new(SimConfig {
            workers: 1,
            ..SimConfig::default()
        });
        assert!(matches!(result, Err(ConfigError::TooFewWorkers { workers: 1 })));
    }

    #[test]
    fn crews_are_split_into_disjoint_groups() {
        let groups = partition_crews(&[1, 2, 3, 4, 5], 2);
        assert_eq!(groups, vec![vec![1, 2, 3], vec![4, 5]]);
        let groups = partition_crews(&[1, 2, 3, 4], 1);
        assert_eq!(groups, vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn round_robin_rotates_through_the_group() {
        let mut planner = CrewPlanner::new(vec![1, 2, 3, 4, 5], CrewAssignment::RoundRobin, 0);
        let crews: Vec<_> = (0..4).map(|_| planner.next_crew()).collect();
        assert_eq!(crews, vec![(1, 2), (3, 4), (5, 1), (2, 3)]);
    }

    #[test]
    fn seeded_random_crews_are_distinct_and_reproducible() {
        let assignment = CrewAssignment::Random { seed: Some(42) };
        let mut first = CrewPlanner::new(vec![1, 2, 3], assignment, 0);
        let mut second = CrewPlanner::new(vec![1, 2, 3], assignment, 0);
        for _ in 0..20 {
            let crew = first.next_crew();
            assert_ne!(crew.0, crew.1);
            assert_eq!(crew, second.next_crew());
        }
    }

    #[test]
    fn hold_metrics_flag_double_holds() {
        let metrics = HoldMetrics::new(2);
        metrics.enter(1);
        metrics.pre_release(1);
        metrics.enter(1);
        assert!(!metrics.has_violation());
        metrics.enter(1);
        assert!(metrics.has_violation());
        assert_eq!(metrics.max_hold(), 2);
    }
}
