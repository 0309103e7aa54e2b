//! Tracing compatibility layer for structured logging.
//!
//! This module provides a unified interface for logging that works whether or not
//! the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled**: Re-exports from the `tracing` crate.
//! - **Without feature**: No-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use effectum::tracing_compat::{debug, info};
//!
//! info!("runtime started");
//! debug!(fiber = %id, "fiber forked");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn, Level};

// When tracing is disabled, provide no-op macros
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => { () };
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => { () };
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => { () };
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => { () };
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => { () };
    }

    pub use crate::{debug, error, info, trace, warn};

    /// Placeholder for `tracing::Level` when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Level {
        /// Trace level.
        TRACE,
        /// Debug level.
        DEBUG,
        /// Info level.
        INFO,
        /// Warn level.
        WARN,
        /// Error level.
        ERROR,
    }
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Log severity for effects that emit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very verbose diagnostics.
    Trace,
    /// Debugging information.
    Debug,
    /// Normal operational messages.
    Info,
    /// Something unexpected that did not fail.
    Warning,
    /// A failure worth attention.
    Error,
}

impl LogLevel {
    /// Emits `message` at this level, tagged with the emitting fiber.
    pub(crate) fn emit(self, fiber: crate::types::FiberId, message: &str) {
        match self {
            Self::Trace => trace!(target: "effectum::log", fiber = %fiber, "{message}"),
            Self::Debug => debug!(target: "effectum::log", fiber = %fiber, "{message}"),
            Self::Info => info!(target: "effectum::log", fiber = %fiber, "{message}"),
            Self::Warning => warn!(target: "effectum::log", fiber = %fiber, "{message}"),
            Self::Error => error!(target: "effectum::log", fiber = %fiber, "{message}"),
        }
        #[cfg(not(feature = "tracing-integration"))]
        let _ = (fiber, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_accept_structured_fields() {
        crate::test_utils::init_test_logging();
        let fiber = crate::types::FiberId::new_for_test(1);
        trace!(fiber = %fiber, "trace");
        debug!(fiber = ?fiber, "debug {}", 1);
        info!("info");
        warn!(attempt = 2, "warn");
        error!("error");
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Error);
        LogLevel::Info.emit(crate::types::FiberId::NONE, "hello");
    }
}
