//! Leveled file logging for evaluation traces.
//!
//! The library never writes to the terminal. Every VCS command and every
//! freshness decision is traced here so a build integration can find out why
//! a task was (or was not) considered up to date.
//!
//! Log levels:
//! - ERROR: an evaluation could not be completed
//! - WARN: recoverable oddities (unreadable optional files, skipped inputs)
//! - INFO: verdicts
//! - DEBUG: individual decisions and VCS queries
//! - TRACE: raw command output
//!
//! Debug mode is enabled with `--debug` or `GIT_UPTODATE_DEBUG=1`. The log
//! file defaults to `~/.git-uptodate/git-uptodate.log` and can be moved with
//! `GIT_UPTODATE_LOG=<path>`. Nothing is written until `init*` is called.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

const DEBUG_ENV: &str = "GIT_UPTODATE_DEBUG";
const PATH_ENV: &str = "GIT_UPTODATE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_log_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::home_dir().map(|h| h.join(".git-uptodate").join("git-uptodate.log"))
}

/// Initialize logging at the default location.
pub fn init(debug: bool) {
    if let Some(path) = default_log_path() {
        init_at(&path, debug);
    }
}

/// Initialize logging to an explicit file. The file is truncated.
pub fn init_at(path: &Path, debug: bool) {
    let level = if debug || env_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let _ = std::fs::write(path, "");
    LOG_PATH.set(path.to_path_buf()).ok();
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

#[macro_export]
macro_rules! ulog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! ulog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! ulog_info {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Only formats anything when the current level admits DEBUG.
#[macro_export]
macro_rules! ulog_debug {
    ($($arg:tt)*) => {
        if $crate::log::get_level() >= $crate::log::LogLevel::Debug {
            $crate::log::debug(&format!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! ulog_trace {
    ($($arg:tt)*) => {
        if $crate::log::get_level() >= $crate::log::LogLevel::Trace {
            $crate::log::trace(&format!($($arg)*))
        }
    };
}
