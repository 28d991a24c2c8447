//! Kernel-style print macros for strand
//!
//! Leveled stderr logging in the manner of printk. Every leveled line is
//! tagged with the task that was current when it was written, so traces
//! from interleaved tasks can be told apart.
//!
//! # Environment Variables
//!
//! - `STRAND_FLUSH_EPRINT=1` - Flush stderr after each print (useful when debugging crashes)
//! - `STRAND_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use strand_core::{kdebug, kinfo, kerror};
//!
//! kinfo!("main loop in ioloop mode {}", mode);
//! kdebug!("woke {} readers on fd {}", n, fd);
//! kerror!("task {} died: {}", id, bomb);
//! ```

use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::constants::TASK_NONE;

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; `None` for anything else
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

// Process-wide configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Task current on this thread's scheduler, for line tags
    static LOG_TASK: Cell<u32> = const { Cell::new(TASK_NONE) };
}

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("STRAND_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("STRAND_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically (overrides the environment)
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Record which task is running; called by the scheduler on every switch
#[inline]
pub fn set_log_task(id: u32) {
    LOG_TASK.with(|cell| cell.set(id));
}

#[inline]
pub fn log_task() -> u32 {
    LOG_TASK.with(|cell| cell.get())
}

#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>, newline: bool) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if newline {
        let _ = handle.write_all(b"\n");
    }
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = match log_task() {
        TASK_NONE => write!(handle, "{} ", level.prefix()),
        0 => write!(handle, "{} [main] ", level.prefix()),
        id => write!(handle, "{} [t{}] ", level.prefix(), id),
    };
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*), false);
    }};
}

/// Print to stderr with newline
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprint_impl(format_args!(""), true);
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*), true);
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::$level,
            format_args!($($arg)*)
        );
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!(Error, $($arg)*) };
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!(Warn, $($arg)*) };
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!(Info, $($arg)*) };
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!(Debug, $($arg)*) };
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!(Trace, $($arg)*) };
}
