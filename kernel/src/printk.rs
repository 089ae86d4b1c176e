//! Kernel log buffer and the `pr_*!` printing macros.
//!
//! Lines end up in a bounded ring that [`dmesg`] snapshots, the way the
//! kernel's printk ring is read back from user space.

use alloc::{
    collections::VecDeque,
    string::{String, ToString},
    vec::Vec,
};
use core::{cmp, fmt};

use spin::Mutex;

// From kernel/printk/printk.c
const LOG_LINE_MAX: usize = 1024 - 32;

/// Number of lines kept before the oldest ones are overwritten.
pub const LOG_BUF_LINES: usize = 1024;

/// Console log levels, `KERN_EMERG` through `KERN_DEBUG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum KernLevel {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

/// One line of the kernel log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: KernLevel,
    pub seq: u64,
    pub line: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>[{:>6}] {}", self.level as u8, self.seq, self.line)
    }
}

struct LogBuffer {
    next_seq: u64,
    lines: VecDeque<LogRecord>,
}

static LOG_BUF: Mutex<LogBuffer> = Mutex::new(LogBuffer {
    next_seq: 0,
    lines: VecDeque::new(),
});

#[doc(hidden)]
pub fn printk(level: KernLevel, s: &[u8]) {
    let line = String::from_utf8_lossy(s).trim_end_matches('\n').to_string();
    let mut buf = LOG_BUF.lock();
    let seq = buf.next_seq;
    buf.next_seq += 1;
    if buf.lines.len() == LOG_BUF_LINES {
        buf.lines.pop_front();
    }
    buf.lines.push_back(LogRecord { level, seq, line });
}

/// Returns a snapshot of the kernel log, oldest line first.
pub fn dmesg() -> Vec<LogRecord> {
    LOG_BUF.lock().lines.iter().cloned().collect()
}

/// Returns `true` if any logged line contains `needle`.
pub fn dmesg_contains(needle: &str) -> bool {
    LOG_BUF.lock().lines.iter().any(|r| r.line.contains(needle))
}

#[doc(hidden)]
pub struct LogLineWriter {
    data: [u8; LOG_LINE_MAX],
    pos: usize,
}

#[allow(clippy::new_without_default)]
impl LogLineWriter {
    pub fn new() -> LogLineWriter {
        LogLineWriter {
            data: [0u8; LOG_LINE_MAX],
            pos: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.pos]
    }
}

impl fmt::Write for LogLineWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let copy_len = cmp::min(LOG_LINE_MAX - self.pos, s.len());
        self.data[self.pos..self.pos + copy_len].copy_from_slice(&s.as_bytes()[..copy_len]);
        self.pos += copy_len;
        Ok(())
    }
}

#[doc(hidden)]
pub fn call_printk(level: KernLevel, args: fmt::Arguments<'_>) {
    let mut writer = LogLineWriter::new();
    let _ = fmt::write(&mut writer, args);
    printk(level, writer.as_bytes());
}

#[macro_export]
macro_rules! pr_err {
    ($($arg:tt)*) => (
        $crate::printk::call_printk($crate::printk::KernLevel::Err, format_args!($($arg)*))
    );
}

#[macro_export]
macro_rules! pr_warn {
    ($($arg:tt)*) => (
        $crate::printk::call_printk($crate::printk::KernLevel::Warning, format_args!($($arg)*))
    );
}

#[macro_export]
macro_rules! pr_info {
    ($($arg:tt)*) => (
        $crate::printk::call_printk($crate::printk::KernLevel::Info, format_args!($($arg)*))
    );
}

/// Debug lines are compiled in only with debug assertions, like `pr_debug`
/// without `DEBUG` defined.
#[macro_export]
macro_rules! pr_debug {
    ($($arg:tt)*) => (
        if cfg!(debug_assertions) {
            $crate::printk::call_printk($crate::printk::KernLevel::Debug, format_args!($($arg)*))
        }
    );
}
