//! Shared mutable state for effects.
//!
//! Programs that need state across fibers hold a [`Ref`] instead of a global.
//! Every operation is an effect, so reading and writing are sequenced with
//! the rest of the program and nothing happens until the effect runs.
//!
//! # Consistency
//!
//! - Updates are serialized by a mutex; `update` and `modify` are atomic
//!   with respect to other fibers.
//! - The update function runs while the lock is held. It must not block.

mod reference;

pub use reference::Ref;
