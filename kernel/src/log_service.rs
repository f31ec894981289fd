//! Kernel logging sink for the `log` facade.
//!
//! Records are rendered as `[LEVEL target] message` on the console; the
//! bare-metal build mirrors every record to COM1 so logs survive a wedged
//! VGA writer.

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!("[{:5} {}] {}", record.level(), record.target(), record.args());
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        crate::arch::x86::serial::write_fmt(format_args!(
            "[{:5} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Called once during boot, before any
/// subsystem `init` that might want to log.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
