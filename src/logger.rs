use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

use crate::kernel;

/// Prints log records prefixed with the simulation time of the logging thread.
struct SimLogger;

static LOGGER: SimLogger = SimLogger;
static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Installs the simulation logger, unless another logger got there first, and
/// sets the maximum level.
pub fn init(level: LevelFilter) {
    let installed = *INSTALLED.get_or_init(|| log::set_logger(&LOGGER).is_ok());
    if installed {
        log::set_max_level(level);
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record.target();
        let target = target.rsplit("::").next().unwrap_or(target);
        println!(
            "{:>14.3}ns {:<5} {:<12} {}",
            kernel::now_ns(),
            record.level(),
            target,
            record.args()
        );
    }

    fn flush(&self) {}
}
