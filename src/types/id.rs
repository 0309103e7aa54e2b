//! Identifier types for fibers.
//!
//! Fiber identifiers are allocated from a process-wide monotonic counter so that
//! ids stay unique across every runtime instance in the process. The value `0`
//! is reserved for [`FiberId::NONE`], used when an interruption is requested from
//! outside of any fiber (for example by a thread calling `run_sync`).

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static FIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    /// Identifier used when no fiber is responsible for an action.
    pub const NONE: Self = Self(0);

    /// Allocates a fresh identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(FIBER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a fiber id for testing/benchmarking purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is [`FiberId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({})", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("#none")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}
