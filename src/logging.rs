use std::io::Write;
use std::thread;

/// Install the trace logger: `<timestamp> <thread>: <message>`.
///
/// Level comes from `RUST_LOG` (default `info`). Safe to call more than once;
/// later calls are ignored.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = buf.timestamp_millis();
            let current = thread::current();
            let thread_name = current.name().unwrap_or("unnamed");
            writeln!(buf, "{ts} {thread_name}: {}", record.args())
        })
        .try_init();
}
