//! effectum: lazy typed effects with fibers, structured concurrency and scoped
//! resources.
//!
//! # Overview
//!
//! An [`Effect<A, E>`] is an immutable description of a computation that
//! succeeds with an `A`, fails with an expected `E`, dies with a defect, or is
//! interrupted. Nothing runs until a [`Runtime`] interprets the description on
//! a lightweight [`Fiber`]. Because descriptions are values, the same effect
//! can be retried, raced, timed out, or run twice.
//!
//! # Core Guarantees
//!
//! - **Laziness**: building an effect performs no work
//! - **Typed failures**: expected errors, defects, and interruptions are
//!   kept apart in a [`Cause`]
//! - **Structured concurrency**: a fiber completes only after its attached
//!   children have finished; parallel combinators interrupt the losers and
//!   wait for them
//! - **Resource safety**: acquisition is uninterruptible, releases run
//!   exactly once, in reverse order
//! - **Dependency injection**: services are looked up by [`Tag`] from a
//!   [`Context`] and wired with [`Layer`]s
//!
//! # Module Structure
//!
//! - [`types`]: [`Exit`], [`Cause`], [`FiberId`] and the [`Value`] bound
//! - [`effect`]: the [`Effect`] type and its core operations
//! - [`combinator`]: join, race, timeout, retry and bracket combinators
//! - [`schedule`]: recurrence policies for retry and repeat
//! - [`context`]: service environments, scopes and layers
//! - [`fiber`]: handles to running fibers
//! - [`sync`]: shared mutable state
//! - [`runtime`]: worker pool, timer and run entry points
//! - [`error`]: runtime and library error types
//!
//! # Example
//!
//! ```ignore
//! use effectum::prelude::*;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let program = Effect::<u32, String>::succeed(20)
//!     .map(|n| n + 1)
//!     .retry(Schedule::recurs(3))
//!     .timeout_option(Duration::from_secs(1));
//! let value: Option<u32> = runtime.run_sync(program)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod combinator;
pub mod context;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod runtime;
pub mod schedule;
pub mod sync;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use combinator::Concurrency;
pub use context::{Context, Layer, Scope, Tag};
pub use effect::{Canceler, Effect, Restore, Resume, TagHandlers, Tagged};
pub use error::{Error, ErrorKind, FiberFailure, Result, ServiceNotFound, TimeoutError};
pub use fiber::{Fiber, FiberStatus};
pub use runtime::{
    run_fork, run_future, run_sync, run_sync_exit, ExitFuture, Runtime, RuntimeBuilder,
    RuntimeConfig,
};
pub use schedule::Schedule;
pub use sync::Ref;
pub use tracing_compat::LogLevel;
pub use types::{Cause, Defect, Exit, ExitKind, FiberId, Never, Value};

/// Everything needed to write and run effects.
pub mod prelude {
    pub use crate::{
        Cause, Concurrency, Context, Effect, Exit, ExitKind, Fiber, Layer, Never, Ref, Runtime,
        RuntimeBuilder, Schedule, Scope, Tag, Tagged, TimeoutError, Value,
    };
    pub use std::time::Duration;
}
