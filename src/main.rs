mod assembly;
mod config;
mod cycle;
mod error;
mod logging;
mod parts;
mod pool;
mod sim;
mod task_queue;
mod types;

use config::{AcquireMode, CrewAssignment, Strategy};

fn parse_usize_list(arg: &str) -> Option<Vec<usize>> {
    if arg == "-" {
        return None;
    }
    let mut values = Vec::new();
    for part in arg.split(',') {
        if part.trim().is_empty() {
            return None;
        }
        let value = part.trim().parse::<usize>().ok()?;
        values.push(value);
    }
    Some(values)
}

fn print_usage(program: &str) {
    println!("Assembly line simulator");
    println!("Usage:");
    println!("  {program} (run demo)");
    println!("  {program} demo [unit_ms]");
    println!("  {program} bench [cars] [workers] [unit_ms] [strategy] [lines] [poll|notify] [roundrobin|random[:seed]] [validate]");
    println!("  {program} stress [car_sets] [worker_sets] [unit_ms]");
    println!("  {program} --help");
    println!();
    println!("Sets are comma-separated lists (e.g., 1,5,10). Use \"-\" to keep defaults for a set.");
    println!("Strategy is sequential|concurrent; lines only applies to concurrent runs.");
    println!("Defaults:");
    println!("  demo   unit_ms=10");
    println!("  bench  cars=5 workers=5 unit_ms=10 strategy=concurrent lines=1 notify");
    println!("  stress cars=1,5,10 workers=2,4,8 unit_ms=2");
    println!("Flags:");
    println!("  validate  report invariant violations on stderr");
    println!("  poll      re-check busy workers on a fixed interval instead of waiting for release");
    println!("  random    pick two random workers per cycle; random:<seed> makes runs reproducible");
    println!("Set RUST_LOG=debug for per-step traces.");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

fn parse_bench_args(program: &str, args: impl Iterator<Item = String>) -> sim::BenchArgs {
    let mut bench = sim::BenchArgs::default();
    let mut positional = 0;
    for arg in args {
        match arg.as_str() {
            "validate" => {
                bench.validate = true;
                continue;
            }
            "poll" => {
                bench.acquire_mode = Some(AcquireMode::Poll);
                continue;
            }
            "notify" => {
                bench.acquire_mode = Some(AcquireMode::Notify);
                continue;
            }
            flag if flag == "roundrobin" || flag.starts_with("random") => {
                match CrewAssignment::parse(flag) {
                    Some(crew) => bench.crew = Some(crew),
                    None => exit_with_usage(program, &format!("bench: invalid crew flag: {flag}")),
                }
                continue;
            }
            _ => {}
        }
        let parsed = match positional {
            0 => arg.parse::<usize>().ok().map(|v| bench.cars = Some(v)),
            1 => arg.parse::<usize>().ok().map(|v| bench.workers = Some(v)),
            2 => arg.parse::<u64>().ok().map(|v| bench.unit_ms = Some(v)),
            3 => Strategy::parse(&arg).map(|v| bench.strategy = Some(v)),
            4 => arg.parse::<usize>().ok().map(|v| bench.lines = Some(v)),
            _ => exit_with_usage(program, &format!("bench: unexpected argument: {arg}")),
        };
        if parsed.is_none() {
            exit_with_usage(program, &format!("bench: invalid value: {arg}"));
        }
        positional += 1;
    }
    bench
}

fn main() {
    logging::init();
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "assembly_line".to_string());
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") => {
            let unit_ms = match args.next() {
                Some(value) => match value.parse::<u64>() {
                    Ok(unit_ms) => Some(unit_ms),
                    Err(_) => exit_with_usage(&program, &format!("demo: invalid unit_ms value: {value}")),
                },
                None => None,
            };
            sim::run_demo(unit_ms);
        }
        Some("bench") => {
            let bench = parse_bench_args(&program, args);
            if let Err(err) = sim::run_benchmark(bench) {
                exit_with_usage(&program, &format!("benchmark error: {err}"));
            }
        }
        Some("stress") => {
            let mut car_sets: Option<Vec<usize>> = None;
            let mut worker_sets: Option<Vec<usize>> = None;
            let mut unit_ms: Option<u64> = None;
            for (index, arg) in args.enumerate() {
                match index {
                    0 | 1 => {
                        let values = if arg == "-" {
                            None
                        } else {
                            match parse_usize_list(&arg) {
                                Some(values) => Some(values),
                                None => exit_with_usage(&program, &format!("stress: invalid set value: {arg}")),
                            }
                        };
                        if index == 0 {
                            car_sets = values;
                        } else {
                            worker_sets = values;
                        }
                    }
                    2 => match arg.parse::<u64>() {
                        Ok(value) => unit_ms = Some(value),
                        Err(_) => exit_with_usage(&program, &format!("stress: invalid unit_ms value: {arg}")),
                    },
                    _ => exit_with_usage(&program, &format!("stress: unexpected argument: {arg}")),
                }
            }
            sim::run_stress(car_sets, worker_sets, unit_ms);
        }
        Some("--help") | Some("-h") | Some("help") => print_usage(&program),
        Some(other) => {
            exit_with_usage(&program, &format!("unknown command: {other}"));
        }
        None => sim::run_demo(None),
    }
}
