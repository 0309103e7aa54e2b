//! The result of running an effect to completion.
//!
//! [`Exit`] is either a success value or a [`Cause`]. [`ExitKind`] summarizes an
//! exit on the severity lattice `Success < Fail < Interrupted < Die`; finalizers
//! and release actions receive it so they can tell how their scope ended.

use super::cause::{Cause, Defect};
use super::id::FiberId;
use super::value::{erase, unerase, AnyExit, Value};
use core::fmt;

/// Summary of how an effect ended, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitKind {
    /// Completed with a value.
    Success,
    /// Failed with an expected error.
    Fail,
    /// Was interrupted.
    Interrupted,
    /// Died with a defect.
    Die,
}

impl ExitKind {
    /// Numeric severity (0 = success, 3 = defect).
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Fail => 1,
            Self::Interrupted => 2,
            Self::Die => 3,
        }
    }

    /// Returns the more severe of two kinds.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Fail => "failure",
            Self::Interrupted => "interrupted",
            Self::Die => "defect",
        })
    }
}

/// The outcome of running an effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<A, E> {
    /// The effect produced a value.
    Success(A),
    /// The effect failed; the cause explains why.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// Creates a successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// Creates an exit failed with a typed error.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// Creates an exit that died with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Failure(Cause::Die(Defect::new(message)))
    }

    /// Creates an exit interrupted by the given fiber.
    #[must_use]
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(by))
    }

    /// Returns the severity summary of this exit.
    #[must_use]
    pub fn kind(&self) -> ExitKind {
        match self {
            Self::Success(_) => ExitKind::Success,
            Self::Failure(cause) => cause.kind(),
        }
    }

    /// Returns true on success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true on any failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the most severe part of the failure is a typed error.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.kind() == ExitKind::Fail
    }

    /// Returns true if the most severe part of the failure is an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.kind() == ExitKind::Interrupted
    }

    /// Returns true if the failure contains a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.kind() == ExitKind::Die
    }

    /// Returns the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Transforms the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Transforms every typed error in the cause.
    pub fn map_error<E2>(self, f: impl FnMut(E) -> E2) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Eliminates the exit with one handler per case.
    pub fn fold<T>(
        self,
        on_failure: impl FnOnce(Cause<E>) -> T,
        on_success: impl FnOnce(A) -> T,
    ) -> T {
        match self {
            Self::Success(a) => on_success(a),
            Self::Failure(c) => on_failure(c),
        }
    }

    /// Converts into a `Result` carrying the whole cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(c) => Err(c),
        }
    }
}

impl<A: Value, E: Value> Exit<A, E> {
    pub(crate) fn into_any(self) -> AnyExit {
        match self {
            Self::Success(a) => Exit::Success(erase(a)),
            Self::Failure(c) => Exit::Failure(c.map(erase)),
        }
    }

    pub(crate) fn from_any(exit: AnyExit) -> Self {
        match exit {
            Exit::Success(a) => Self::Success(unerase(a)),
            Exit::Failure(c) => Self::Failure(c.map(unerase)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(ExitKind::Success < ExitKind::Fail);
        assert!(ExitKind::Fail < ExitKind::Interrupted);
        assert!(ExitKind::Interrupted < ExitKind::Die);
        assert_eq!(ExitKind::Fail.worst(ExitKind::Die), ExitKind::Die);
        assert_eq!(ExitKind::Die.severity(), 3);
    }

    #[test]
    fn predicates() {
        let ok: Exit<i32, &str> = Exit::succeed(1);
        assert!(ok.is_success());
        assert_eq!(ok.kind(), ExitKind::Success);

        let failed: Exit<i32, &str> = Exit::fail("e");
        assert!(failed.is_fail());
        assert_eq!(failed.cause().and_then(Cause::first_failure), Some(&"e"));

        let died: Exit<i32, &str> = Exit::die("boom");
        assert!(died.is_die());

        let interrupted: Exit<i32, &str> = Exit::interrupt(FiberId::new_for_test(4));
        assert!(interrupted.is_interrupted());
    }

    #[test]
    fn fold_and_map() {
        let ok: Exit<i32, String> = Exit::succeed(2);
        assert_eq!(ok.map(|n| n * 2).fold(|_| 0, |n| n), 4);

        let failed: Exit<i32, &str> = Exit::fail("bad");
        let mapped = failed.map_error(str::len);
        assert_eq!(mapped, Exit::fail(3));
        assert_eq!(mapped.into_result(), Err(Cause::Fail(3)));
    }

    #[test]
    fn erased_round_trip() {
        let exit: Exit<String, u32> = Exit::Failure(Cause::Fail(7).then(Cause::die("x")));
        let back: Exit<String, u32> = Exit::from_any(exit.clone().into_any());
        assert_eq!(back, exit);
    }
}
