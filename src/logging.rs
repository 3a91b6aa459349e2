//! Structured logging setup (SPEC_FULL §4.9).
//!
//! `tracing` events go to stderr so they never pollute a wire protocol
//! running on stdout/stdin (the worker protocol, §4.6, and the CLI's own
//! printed query results both depend on that).

use crate::config::LogLevel;

/// Maps the config's syslog-flavored `logLevel` onto `tracing::Level`
/// (SPEC_FULL §4.9): the three extra syslog levels this spec recognizes but
/// `tracing` does not collapse onto the nearest supported level.
pub fn to_tracing_level(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Notice => tracing::Level::INFO,
        LogLevel::Warning => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Critical => tracing::Level::ERROR,
        LogLevel::Alert => tracing::Level::ERROR,
        LogLevel::Emergency => tracing::Level::ERROR,
    }
}

/// Installs the global `tracing` subscriber. Called once, at the start of
/// each executable's `main`. Safe to call more than once per process in
/// tests (`try_init` swallows the "already set" error).
pub fn init(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(to_tracing_level(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_collapses_to_info() {
        assert_eq!(to_tracing_level(LogLevel::Notice), tracing::Level::INFO);
    }

    #[test]
    fn critical_alert_emergency_collapse_to_error() {
        assert_eq!(to_tracing_level(LogLevel::Critical), tracing::Level::ERROR);
        assert_eq!(to_tracing_level(LogLevel::Alert), tracing::Level::ERROR);
        assert_eq!(to_tracing_level(LogLevel::Emergency), tracing::Level::ERROR);
    }

    #[test]
    fn warning_maps_to_warn() {
        assert_eq!(to_tracing_level(LogLevel::Warning), tracing::Level::WARN);
    }
}
