#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use effectum::{Runtime, RuntimeBuilder};
use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default number of cases for property tests.
pub const DEFAULT_PROPTEST_CASES: u32 = 64;

const PROPTEST_CASES_ENV: &str = "EFFECTUM_PROPTEST_CASES";

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase with a separator.
pub fn test_phase(name: &str) {
    tracing::info!(phase = %name, "========================================");
    tracing::info!(phase = %name, "TEST PHASE: {}", name);
    tracing::info!(phase = %name, "========================================");
}

/// Log test completion.
pub fn test_complete(name: &str) {
    tracing::info!(test = %name, "test completed successfully: {}", name);
}

/// Initialize logging and announce the test.
pub fn init_test(name: &str) {
    init_test_logging();
    test_phase(name);
}

/// A multi-threaded runtime sized for tests.
pub fn runtime() -> Runtime {
    RuntimeBuilder::new()
        .worker_threads(4)
        .thread_name_prefix("effectum-it")
        .build()
        .expect("failed to build test runtime")
}

/// Proptest config honoring `EFFECTUM_PROPTEST_CASES`.
pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var(PROPTEST_CASES_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_PROPTEST_CASES);
    ProptestConfig::with_cases(cases)
}

/// An append-only event log shared between effects and assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// An effect that records `event` when run.
    pub fn record<E: effectum::Value>(&self, event: &str) -> effectum::Effect<(), E> {
        let log = self.clone();
        let event = event.to_string();
        effectum::Effect::sync(move || log.push(event.clone()))
    }
}
