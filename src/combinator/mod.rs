//! Combinators for structured concurrency and resource safety.
//!
//! Each submodule adds methods to [`Effect`](crate::Effect) and, where the
//! interpreter needs help, lowers a dedicated node into simpler ones:
//!
//! - [`join`]: run many effects with a [`Concurrency`] bound, waiting for all
//! - [`race`]: run effects in parallel, first wins, losers are drained
//! - [`timeout`]: add a deadline to an effect
//! - [`bracket`](mod@bracket): acquire/use/release and scoped resources
//! - [`retry`]: retry and repeat driven by a [`Schedule`](crate::Schedule)

pub mod bracket;
pub mod join;
pub mod race;
pub mod retry;
pub mod timeout;

pub use join::Concurrency;
