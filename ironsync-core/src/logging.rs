// logging.rs - process-wide leveled logging with a swappable sink
// Level is process-wide; `init_from_env` reads IRONSYNC_LOG

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Environment variable consulted by [`init_from_env`]
pub const LOG_ENV_VAR: &str = "IRONSYNC_LOG";

/// Log levels (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors - failed persistence, failed sync targets
    Error = 0,
    /// Warnings - skipped work that a caller may not expect
    Warn = 1,
    /// Info - high-level operational information
    Info = 2,
    /// Debug - bulk update/delete counts, sync transitions
    Debug = 3,
    /// Trace - every compiled pipeline
    Trace = 4,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.trim().to_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(level: u8) -> LogLevel {
        match level {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            4 => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

// Global log level (default: WARN for production)
static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Set the global log level
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Get the current global log level
pub fn get_log_level() -> LogLevel {
    LogLevel::from_u8(GLOBAL_LOG_LEVEL.load(Ordering::Relaxed))
}

/// Apply the level named by `IRONSYNC_LOG`, if it is set and valid.
///
/// Returns the level that was applied.
pub fn init_from_env() -> Option<LogLevel> {
    let level = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|raw| LogLevel::parse(&raw))?;
    set_log_level(level);
    Some(level)
}

/// Receives every message that passes the level check
pub type LogSink = Arc<dyn Fn(LogLevel, &str, &str) + Send + Sync>;

lazy_static! {
    static ref SINK: RwLock<Option<LogSink>> = RwLock::new(None);
}

/// Route log output to `sink` instead of stderr; `None` restores stderr
pub fn set_log_sink(sink: Option<LogSink>) {
    *SINK.write() = sink;
}

/// Check if a message at the given level should be logged
#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

#[doc(hidden)]
pub fn log_message(level: LogLevel, module: &str, message: &str) {
    if !should_log(level) {
        return;
    }
    let sink = SINK.read().clone();
    match sink {
        Some(sink) => sink(level, module, message),
        None => eprintln!("[{}] {}: {}", level.as_str(), module, message),
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {
        if $crate::logging::should_log($level) {
            $crate::logging::log_message($level, module_path!(), &format!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Debug, $($arg)*) };
}

/// Only formats the message when tracing is enabled
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" DeBuG "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("invalid"), None);
    }

    #[test]
    fn test_level_roundtrip_through_u8() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            assert_eq!(LogLevel::from_u8(level as u8), level);
        }
        assert_eq!(LogLevel::from_u8(42), LogLevel::Warn);
    }

    #[test]
    fn test_sink_receives_enabled_levels_only() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let captured = seen.clone();
        set_log_sink(Some(Arc::new(move |level, module, message| {
            captured.lock().push((level, module.to_string(), message.to_string()));
        })));

        let previous = get_log_level();
        set_log_level(LogLevel::Warn);
        crate::log_error!("target {} failed", 7);
        crate::log_debug!("hidden");
        set_log_level(previous);
        set_log_sink(None);

        let seen = seen.lock();
        assert!(seen
            .iter()
            .any(|(level, module, message)| *level == LogLevel::Error
                && module.ends_with("logging::tests")
                && message == "target 7 failed"));
        assert!(seen.iter().all(|(_, _, message)| message != "hidden"));
    }
}
