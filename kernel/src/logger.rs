use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::{pr_debug, pr_err, pr_info, pr_warn};

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let module_path = record.module_path().unwrap_or_default();
        match record.level() {
            Level::Error => pr_err!("[ERROR] [{}] {}", module_path, record.args()),
            Level::Warn => pr_warn!("[ WARN] [{}] {}", module_path, record.args()),
            Level::Info => pr_info!("[ INFO] [{}] {}", module_path, record.args()),
            // Both go to KERN_DEBUG and vanish from release builds.
            Level::Debug => pr_debug!("[DEBUG] [{}] {}", module_path, record.args()),
            Level::Trace => pr_debug!("[TRACE] [{}] {}", module_path, record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;

/// Routes the `log` facade into the kernel log.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logger() {
    if log::set_logger(&LOGGER).is_err() {
        return;
    }
    log::set_max_level(level_from_env(option_env!("LOG")));
    pr_info!("Init logger {:?}", option_env!("LOG"));
}

fn level_from_env(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}
