//! Lazy, typed descriptions of computations.
//!
//! An [`Effect<A, E>`] describes a computation that, when run by a
//! [`Runtime`](crate::Runtime), either succeeds with an `A`, fails with an
//! expected error `E`, dies with a [`Defect`](crate::Defect), or is
//! interrupted. Building an effect performs no work; running the same effect
//! twice runs every step twice.
//!
//! ```ignore
//! let program = Effect::<u32, String>::sync(|| 20)
//!     .map(|n| n + 1)
//!     .flat_map(|n| if n > 20 { Effect::succeed(n * 2) } else { Effect::fail("small".into()) });
//!
//! assert_eq!(runtime.run_sync(program)?, 42);
//! ```
//!
//! Operations are grouped by concern:
//!
//! - `constructors`: `succeed`, `fail`, `sync`, `async_effect`, `sleep`, ...
//! - `sequencing`: `map`, `flat_map`, `zip`, `all`, `for_each`, ...
//! - `errors`: `catch_all`, `catch_tag`, `fold`, `either`, `sandbox`, ...
//! - `validation`: `validate`, `validate_all`, `validate_first`, `partition`
//! - `lifecycle`: interruption masks, `ensuring`, `on_exit`, `fork`
//! - `environment`: `service`, `provide_service`, `provide_layer`

mod constructors;
mod environment;
mod errors;
mod lifecycle;
pub(crate) mod node;
mod sequencing;
mod validation;

pub use constructors::Resume;
pub use errors::{TagHandlers, Tagged};
pub use lifecycle::Restore;
pub use node::Canceler;

use node::NodeRef;
use std::fmt;
use std::marker::PhantomData;

use crate::types::Never;

/// A lazy description of a computation producing `A` or failing with `E`.
///
/// Effects are immutable and cheap to clone.
#[must_use = "effects are lazy and do nothing unless run"]
pub struct Effect<A, E = Never> {
    node: NodeRef,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Effect<A, E> {
    pub(crate) const fn from_node(node: NodeRef) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn node(&self) -> &NodeRef {
        &self.node
    }

    pub(crate) fn into_node(self) -> NodeRef {
        self.node
    }

    /// Reinterprets the type parameters without changing the description.
    ///
    /// Only sound when the erased values flowing through the node match the
    /// new types; callers use it where the error channel is provably empty.
    pub(crate) fn retype<B, E2>(self) -> Effect<B, E2> {
        Effect::from_node(self.node)
    }
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self::from_node(std::sync::Arc::clone(&self.node))
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.node.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_runtime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn building_performs_no_work() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("building_performs_no_work");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let effect = Effect::<usize, Never>::sync(move || counter.fetch_add(1, Ordering::SeqCst))
            .map(|n| n + 1);
        let _copy = effect.clone();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let runtime = test_runtime();
        assert_eq!(runtime.run_sync(effect.clone()).ok(), Some(1));
        assert_eq!(runtime.run_sync(effect).ok(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        crate::test_complete!("building_performs_no_work");
    }

    #[test]
    fn debug_names_the_root_node() {
        let effect = Effect::<u8, Never>::succeed(1).map(|n| n + 1);
        assert_eq!(format!("{effect:?}"), "Effect(\"FlatMap\")");
    }
}
