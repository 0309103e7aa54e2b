//! Structured failure causes.
//!
//! A [`Cause`] records *why* an effect did not succeed. It distinguishes three
//! kinds of leaves and keeps composite structure when several things went wrong:
//!
//! - [`Cause::Fail`]: an expected, typed failure from the error channel
//! - [`Cause::Die`]: an unexpected defect (panic or invariant violation)
//! - [`Cause::Interrupt`]: the fiber was interrupted
//!
//! Composite causes come from finalizers failing after a primary failure
//! ([`Cause::Sequential`]) and from concurrent branches failing together
//! ([`Cause::Parallel`]). The severity ordering matches [`ExitKind`]:
//! `Fail < Interrupted < Die`.

use super::exit::ExitKind;
use super::id::FiberId;
use core::fmt;
use std::any::Any;

/// An unexpected failure: a panic or a violated runtime invariant.
///
/// Defects are never caught by typed error handlers; only cause-level handlers
/// such as `catch_all_cause` or `sandbox` can observe them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
    fiber: Option<FiberId>,
}

impl Defect {
    /// Creates a new defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fiber: None,
        }
    }

    /// Builds a defect from a payload captured by `catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(message)
    }

    /// Records the fiber that raised the defect, unless one is already set.
    #[must_use]
    pub fn with_fiber(mut self, fiber: FiberId) -> Self {
        if self.fiber.is_none() {
            self.fiber = Some(fiber);
        }
        self
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the fiber that raised the defect, if known.
    #[must_use]
    pub const fn fiber(&self) -> Option<FiberId> {
        self.fiber
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)?;
        if let Some(fiber) = self.fiber {
            write!(f, " (fiber {fiber})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Defect {}

/// The full story of a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause<E> {
    /// Nothing went wrong. The identity for [`Cause::then`] and [`Cause::both`].
    Empty,
    /// An expected failure carrying a typed error.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one (e.g. a failing finalizer).
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// Builds a defect cause from a message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Sequential composition; `Empty` on either side is dropped.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        match (self, next) {
            (Self::Empty, other) | (other, Self::Empty) => other,
            (first, second) => Self::Sequential(Box::new(first), Box::new(second)),
        }
    }

    /// Parallel composition; `Empty` on either side is dropped.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        match (self, other) {
            (Self::Empty, other) | (other, Self::Empty) => other,
            (left, right) => Self::Parallel(Box::new(left), Box::new(right)),
        }
    }

    /// Returns true if the cause contains no failure, defect or interruption.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => false,
            Self::Sequential(l, r) | Self::Parallel(l, r) => l.is_empty() && r.is_empty(),
        }
    }

    /// Returns true if the cause contains at least one typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.first_failure().is_some()
    }

    /// Returns true if the cause contains at least one defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        match self {
            Self::Die(_) => true,
            Self::Empty | Self::Fail(_) | Self::Interrupt(_) => false,
            Self::Sequential(l, r) | Self::Parallel(l, r) => l.is_die() || r.is_die(),
        }
    }

    /// Returns true if the cause contains at least one interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupt(_) => true,
            Self::Empty | Self::Fail(_) | Self::Die(_) => false,
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                l.is_interrupted() || r.is_interrupted()
            }
        }
    }

    /// Returns true if every leaf of the cause is an interruption.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Self::Interrupt(_) => true,
            Self::Empty | Self::Fail(_) | Self::Die(_) => false,
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                (l.is_empty() || l.is_interrupted_only())
                    && (r.is_empty() || r.is_interrupted_only())
                    && !(l.is_empty() && r.is_empty())
            }
        }
    }

    /// Returns the most severe kind present in the cause.
    ///
    /// An empty cause is reported as [`ExitKind::Fail`]: a failed exit with an
    /// empty cause is still a failure.
    #[must_use]
    pub fn kind(&self) -> ExitKind {
        if self.is_die() {
            ExitKind::Die
        } else if self.is_interrupted() {
            ExitKind::Interrupted
        } else {
            ExitKind::Fail
        }
    }

    /// Returns the first typed failure, in depth-first left-to-right order.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        match self {
            Self::Fail(e) => Some(e),
            Self::Empty | Self::Die(_) | Self::Interrupt(_) => None,
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                l.first_failure().or_else(|| r.first_failure())
            }
        }
    }

    /// Returns every typed failure in the cause.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Fail(e) = leaf {
                out.push(e);
            }
        });
        out
    }

    /// Returns every defect in the cause.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Die(d) = leaf {
                out.push(d);
            }
        });
        out
    }

    /// Returns the ids of every fiber that requested an interruption.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Interrupt(id) = leaf {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        });
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        match self {
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                l.visit(f);
                r.visit(f);
            }
            leaf => f(leaf),
        }
    }

    /// Extracts the first typed failure, or gives the cause back when it has none.
    pub fn failure_or_cause(self) -> Result<E, Self> {
        match self {
            Self::Fail(e) => Ok(e),
            Self::Sequential(l, r) => match l.failure_or_cause() {
                Ok(e) => Ok(e),
                Err(l) => r
                    .failure_or_cause()
                    .map_err(|r| Self::Sequential(Box::new(l), Box::new(r))),
            },
            Self::Parallel(l, r) => match l.failure_or_cause() {
                Ok(e) => Ok(e),
                Err(l) => r
                    .failure_or_cause()
                    .map_err(|r| Self::Parallel(Box::new(l), Box::new(r))),
            },
            other => Err(other),
        }
    }

    /// Transforms every typed failure, preserving structure.
    #[must_use]
    pub fn map<E2>(self, mut f: impl FnMut(E) -> E2) -> Cause<E2> {
        self.map_with(&mut f)
    }

    fn map_with<E2>(self, f: &mut impl FnMut(E) -> E2) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => {
                let l = l.map_with(f);
                Cause::Sequential(Box::new(l), Box::new(r.map_with(f)))
            }
            Self::Parallel(l, r) => {
                let l = l.map_with(f);
                Cause::Parallel(Box::new(l), Box::new(r.map_with(f)))
            }
        }
    }

    /// Drops every typed failure, keeping defects and interruptions.
    ///
    /// Used when a failure is re-raised through a channel that cannot carry `E`.
    #[must_use]
    pub fn strip_failures<E2>(self) -> Cause<E2> {
        match self {
            Self::Empty | Self::Fail(_) => Cause::Empty,
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => l.strip_failures().then(r.strip_failures()),
            Self::Parallel(l, r) => l.strip_failures().both(r.strip_failures()),
        }
    }

    /// Folds the cause tree bottom-up.
    pub fn fold<T>(
        &self,
        on_empty: &impl Fn() -> T,
        on_fail: &impl Fn(&E) -> T,
        on_die: &impl Fn(&Defect) -> T,
        on_interrupt: &impl Fn(FiberId) -> T,
        on_sequential: &impl Fn(T, T) -> T,
        on_parallel: &impl Fn(T, T) -> T,
    ) -> T {
        let recurse = |c: &Self| {
            c.fold(
                on_empty,
                on_fail,
                on_die,
                on_interrupt,
                on_sequential,
                on_parallel,
            )
        };
        match self {
            Self::Empty => on_empty(),
            Self::Fail(e) => on_fail(e),
            Self::Die(d) => on_die(d),
            Self::Interrupt(id) => on_interrupt(*id),
            Self::Sequential(l, r) => on_sequential(recurse(l), recurse(r)),
            Self::Parallel(l, r) => on_parallel(recurse(l), recurse(r)),
        }
    }
}

impl<E: fmt::Debug> Cause<E> {
    /// Renders the cause as an indented tree.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.render(0, &mut out);
        out
    }

    fn render(&self, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match self {
            Self::Empty => out.push_str(&format!("{pad}Empty\n")),
            Self::Fail(e) => out.push_str(&format!("{pad}Fail({e:?})\n")),
            Self::Die(d) => out.push_str(&format!("{pad}Die({d})\n")),
            Self::Interrupt(id) => out.push_str(&format!("{pad}Interrupt({id})\n")),
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                let label = if matches!(self, Self::Sequential(..)) {
                    "Sequential"
                } else {
                    "Parallel"
                };
                out.push_str(&format!("{pad}{label}\n"));
                l.render(depth + 1, out);
                r.render(depth + 1, out);
            }
        }
    }
}
