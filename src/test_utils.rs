//! Test utilities for effectum.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A small multi-threaded runtime constructor
//! - Exit assertion macros
//!
//! # Example
//! ```ignore
//! use crate::test_utils::{init_test_logging, test_runtime};
//!
//! #[test]
//! fn my_test() {
//!     init_test_logging();
//!     let runtime = test_runtime();
//!     let exit = runtime.run_sync_exit(Effect::<u8, Never>::succeed(1));
//!     crate::assert_exit_success!(exit, 1);
//! }
//! ```

use crate::runtime::{Runtime, RuntimeBuilder};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Worker threads used by [`test_runtime`].
pub const TEST_WORKER_THREADS: usize = 4;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Create a runtime with a few workers and a recognizable thread prefix.
#[must_use]
pub fn test_runtime() -> Runtime {
    RuntimeBuilder::new()
        .worker_threads(TEST_WORKER_THREADS)
        .thread_name_prefix("effectum-test")
        .build()
        .expect("failed to build test runtime")
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Success(v) => assert_eq!(v, $expected),
            other => unreachable!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit failed with exactly one expected error.
#[macro_export]
macro_rules! assert_exit_fail {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Failure($crate::types::Cause::Fail(e)) => assert_eq!(e, $expected),
            other => unreachable!("expected Cause::Fail({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit died with a defect.
#[macro_export]
macro_rules! assert_exit_die {
    ($exit:expr) => {
        match $exit {
            ref exit if exit.is_die() => {}
            other => unreachable!("expected a defect, got {:?}", other),
        }
    };
}

/// Assert that an exit was interrupted.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            ref exit if exit.is_interrupted() => {}
            other => unreachable!("expected an interruption, got {:?}", other),
        }
    };
}
