//! Error types for the runtime and for the failures effects report.
//!
//! Two families live here:
//!
//! - [`Error`] with [`ErrorKind`]: infrastructure errors (bad configuration,
//!   thread spawn failures, a runtime that has shut down). These are returned as
//!   ordinary `Result`s from builders and entry points.
//! - Failure values that effects carry in their typed error channel or as
//!   defects: [`FiberFailure`] (what `run_sync` returns when an effect does not
//!   succeed), [`TimeoutError`] and [`ServiceNotFound`].

use crate::types::{Cause, ExitKind, FiberId};
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The kind of runtime infrastructure error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A configuration value is invalid.
    InvalidConfig,
    /// A configuration file could not be read or parsed.
    ConfigFile,
    /// An OS thread could not be spawned.
    ThreadSpawn,
    /// The runtime has been shut down.
    Shutdown,
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns true if retrying the same operation could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ThreadSpawn)
    }
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Shorthand for an [`ErrorKind::InvalidConfig`] error with a message.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(msg)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A specialized `Result` for runtime infrastructure operations.
pub type Result<T> = core::result::Result<T, Error>;

/// An effect run through `run_sync` did not succeed.
///
/// Carries the id of the root fiber and the full [`Cause`].
#[derive(Debug, Clone, PartialEq)]
pub struct FiberFailure<E> {
    fiber: FiberId,
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    pub(crate) const fn new(fiber: FiberId, cause: Cause<E>) -> Self {
        Self { fiber, cause }
    }

    /// The root fiber that failed.
    #[must_use]
    pub const fn fiber(&self) -> FiberId {
        self.fiber
    }

    /// The failure cause.
    #[must_use]
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Consumes the failure, returning its cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }

    /// The most severe kind of failure in the cause.
    #[must_use]
    pub fn kind(&self) -> ExitKind {
        self.cause.kind()
    }

    /// The first typed error, if the cause holds one.
    #[must_use]
    pub fn failure(&self) -> Option<&E> {
        self.cause.first_failure()
    }
}

impl<E: fmt::Debug> fmt::Display for FiberFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fiber {} ended with {}:\n{}",
            self.fiber,
            self.kind(),
            self.cause.pretty()
        )
    }
}

impl<E: fmt::Debug> std::error::Error for FiberFailure<E> {}

/// An effect did not complete before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("operation timed out after {duration:?}")]
pub struct TimeoutError {
    /// The timeout that elapsed.
    pub duration: Duration,
}

impl From<crate::types::Never> for TimeoutError {
    fn from(never: crate::types::Never) -> Self {
        match never {}
    }
}

/// A service was requested from an environment that does not provide it.
///
/// Raised as a defect: a missing binding is a wiring mistake, not an expected
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("service not found: {tag}")]
pub struct ServiceNotFound {
    /// Name of the missing service tag.
    pub tag: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::invalid_config("worker_threads must be positive");
        assert_eq!(
            err.to_string(),
            "InvalidConfig: worker_threads must be positive"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::ThreadSpawn).with_source(Underlying);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "underlying");
        assert!(err.is_retryable());
    }

    #[test]
    fn fiber_failure_reports_cause() {
        let failure = FiberFailure::new(FiberId::new_for_test(3), Cause::Fail("boom"));
        assert_eq!(failure.kind(), ExitKind::Fail);
        assert_eq!(failure.failure(), Some(&"boom"));
        let text = failure.to_string();
        assert!(text.contains("fiber #3 ended with failure"), "{text}");
        assert!(text.contains("Fail(\"boom\")"), "{text}");
    }

    #[test]
    fn timeout_and_missing_service_messages() {
        let t = TimeoutError {
            duration: Duration::from_millis(50),
        };
        assert_eq!(t.to_string(), "operation timed out after 50ms");
        let s = ServiceNotFound { tag: "Random" };
        assert_eq!(s.to_string(), "service not found: Random");
    }
}
