//! `log` crate facade backed by the 16550 UART (`arch::x86_64::serial`).
//!
//! Early boot diagnostics and panic messages keep using `println!`/
//! `serial_println!` directly since they run before [`init`] installs this
//! logger; everything after boot goes through `log::{info,warn,error,trace}!`.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

fn max_level() -> Level {
    if cfg!(debug_assertions) {
        Level::Trace
    } else {
        Level::Info
    }
}

/// Install [`KernelLogger`] as the `log` crate's global logger. Idempotent
/// at the call site: `set_logger` itself returns `Err` on a second call,
/// which is not a fatal condition here.
pub fn init() {
    let filter = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    log::set_max_level(filter);
    let _ = log::set_logger(&LOGGER);
}
