//! Kernel log output.

use std::io::Write;

pub struct Logger;

impl Logger {
    /// Install the logger. The maximum level comes from the `MARMOT_LOG`
    /// environment variable (`error`..`trace`), defaulting to `info`.
    /// Safe to call more than once; later calls only adjust the level.
    pub fn init(&'static self) {
        let _ = log::set_logger(self);
        log::set_max_level(level_from_env());
    }
}

fn level_from_env() -> log::LevelFilter {
    match std::env::var("MARMOT_LOG").as_deref() {
        Ok("error") => log::LevelFilter::Error,
        Ok("warn") => log::LevelFilter::Warn,
        Ok("debug") => log::LevelFilter::Debug,
        Ok("trace") => log::LevelFilter::Trace,
        Ok("off") => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(
                stderr,
                "[{}:{}] {}: {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
