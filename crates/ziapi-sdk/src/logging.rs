//! Log sink setup
//!
//! All crates emit `tracing` events; this module installs the subscriber.
//! The level passed to [`init_logger`] is the default, `RUST_LOG` overrides it
//! per target (e.g. `RUST_LOG=ziapi_driver=trace`).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Logger already initialized: {0}")]
    AlreadyInitialized(String),
    #[error("Unknown debug level: {0}")]
    UnknownLevel(String),
}

/// Severity of a log record, lowest first
///
/// `Status` is an informational level above `Info`; `Fatal` marks records
/// written right before giving up. Both collapse onto the nearest tracing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum DebugLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Status = 3,
    Warning = 4,
    Error = 5,
    Fatal = 6,
}

impl DebugLevel {
    pub const ALL: [DebugLevel; 7] = [
        DebugLevel::Trace,
        DebugLevel::Debug,
        DebugLevel::Info,
        DebugLevel::Status,
        DebugLevel::Warning,
        DebugLevel::Error,
        DebugLevel::Fatal,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }

    pub fn to_tracing(self) -> Level {
        match self {
            DebugLevel::Trace => Level::TRACE,
            DebugLevel::Debug => Level::DEBUG,
            DebugLevel::Info | DebugLevel::Status => Level::INFO,
            DebugLevel::Warning => Level::WARN,
            DebugLevel::Error | DebugLevel::Fatal => Level::ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DebugLevel::Trace => "trace",
            DebugLevel::Debug => "debug",
            DebugLevel::Info => "info",
            DebugLevel::Status => "status",
            DebugLevel::Warning => "warning",
            DebugLevel::Error => "error",
            DebugLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if let Ok(raw) = s.parse::<u8>() {
            return Self::from_raw(raw).ok_or(LoggingError::UnknownLevel(s));
        }
        match s.as_str() {
            "warn" => Ok(DebugLevel::Warning),
            "err" => Ok(DebugLevel::Error),
            _ => Self::ALL
                .iter()
                .copied()
                .find(|l| l.as_str() == s)
                .ok_or(LoggingError::UnknownLevel(s)),
        }
    }
}

/// Filter with `level` as default directive, refined by `RUST_LOG`.
pub fn env_filter(level: DebugLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.to_tracing().into())
        .from_env_lossy()
}

/// Install the global fmt subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logger(level: DebugLevel) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Write one line to the log sink at `level`.
pub fn write_debug_log(level: DebugLevel, message: &str) {
    match level {
        DebugLevel::Trace => tracing::trace!(target: "ziapi", "{}", message),
        DebugLevel::Debug => tracing::debug!(target: "ziapi", "{}", message),
        DebugLevel::Info => tracing::info!(target: "ziapi", "{}", message),
        DebugLevel::Status => tracing::info!(target: "ziapi", status = true, "{}", message),
        DebugLevel::Warning => tracing::warn!(target: "ziapi", "{}", message),
        DebugLevel::Error => tracing::error!(target: "ziapi", "{}", message),
        DebugLevel::Fatal => tracing::error!(target: "ziapi", fatal = true, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tracing_mapping() {
        assert_eq!(DebugLevel::Trace.to_tracing(), Level::TRACE);
        assert_eq!(DebugLevel::Status.to_tracing(), Level::INFO);
        assert_eq!(DebugLevel::Warning.to_tracing(), Level::WARN);
        assert_eq!(DebugLevel::Fatal.to_tracing(), Level::ERROR);
        assert!(DebugLevel::Status > DebugLevel::Info);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Warning".parse::<DebugLevel>().unwrap(), DebugLevel::Warning);
        assert_eq!("warn".parse::<DebugLevel>().unwrap(), DebugLevel::Warning);
        assert_eq!("3".parse::<DebugLevel>().unwrap(), DebugLevel::Status);
        assert_eq!(DebugLevel::from_raw(6), Some(DebugLevel::Fatal));
        assert_eq!(DebugLevel::from_raw(7), None);
        let err = "loud".parse::<DebugLevel>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown debug level: loud");
    }

    #[test]
    #[serial]
    fn test_init_once() {
        // Second install always fails.
        let _ = init_logger(DebugLevel::Debug);
        assert!(matches!(
            init_logger(DebugLevel::Info),
            Err(LoggingError::AlreadyInitialized(_))
        ));
        for level in DebugLevel::ALL {
            write_debug_log(level, "log line");
        }
    }
}
