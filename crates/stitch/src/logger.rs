//! Minimal stderr logger used by examples and tools.

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("{:>5} [{}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the logger at the given level. Safe to call more than once; later
/// calls only adjust the level.
pub fn init(filter: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}

/// Parse a level name, falling back to `info` for unknown values.
pub fn level_from_str(s: &str) -> LevelFilter {
    match s.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the logger with the level taken from `STITCH_LOG`, defaulting to
/// `info`.
pub fn init_from_env() {
    let level = std::env::var("STITCH_LOG")
        .map(|s| level_from_str(&s))
        .unwrap_or(LevelFilter::Info);
    init(level);
}
