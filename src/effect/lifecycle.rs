//! Interruption masks, finalizers and forking.

use super::node::{ensuring_node, unit_node, with_fiber_node, Node, NodeRef};
use super::Effect;
use crate::combinator::join::Concurrency;
use crate::fiber::Fiber;
use crate::runtime::fiber_cell::FiberCell;
use crate::types::{unerase, AnyExit, Cause, Exit, Never, Value};
use std::sync::Arc;

/// Restores the interruptibility that was in effect outside an
/// [`Effect::uninterruptible_mask`] region.
#[derive(Debug, Clone, Copy)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the outer interruptibility.
    pub fn apply<A: Value, E: Value>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        Effect::from_node(set_interruptible(effect.into_node(), self.interruptible))
    }
}

fn set_interruptible(source: NodeRef, interruptible: bool) -> NodeRef {
    Arc::new(Node::SetInterruptible {
        source,
        interruptible,
    })
}

impl<A: Value, E: Value> Effect<A, E> {
    /// Runs this effect without observing interruption.
    ///
    /// An interruption requested meanwhile takes effect when the region ends.
    pub fn uninterruptible(self) -> Self {
        Self::from_node(set_interruptible(self.node, false))
    }

    /// Makes this effect interruptible, even inside an uninterruptible region.
    pub fn interruptible(self) -> Self {
        Self::from_node(set_interruptible(self.node, true))
    }

    /// Runs `f` uninterruptibly, handing it a [`Restore`] that re-enables the
    /// outer interruptibility for selected parts.
    pub fn uninterruptible_mask(f: impl Fn(Restore) -> Self + Send + Sync + 'static) -> Self {
        Self::from_node(with_fiber_node(move |view| {
            let restore = Restore {
                interruptible: view.interruptible,
            };
            set_interruptible(f(restore).into_node(), false)
        }))
    }

    /// Runs `finalizer` after this effect, whatever its outcome.
    ///
    /// The finalizer runs uninterruptibly. If it dies, the defect is added
    /// after the original cause.
    pub fn ensuring<X: Value>(self, finalizer: Effect<X, Never>) -> Self {
        let finalizer = finalizer.into_node();
        Self::from_node(ensuring_node(self.node, move |_| Arc::clone(&finalizer)))
    }

    /// Runs `f` with the exit of this effect, then re-raises that exit.
    pub fn on_exit<X: Value>(
        self,
        f: impl Fn(&Exit<A, E>) -> Effect<X, Never> + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(ensuring_node(self.node, move |exit: &AnyExit| {
            let typed: Exit<A, E> = Exit::from_any(exit.clone());
            f(&typed).into_node()
        }))
    }

    /// Runs `f` with the cause if this effect fails for any reason.
    pub fn on_error<X: Value>(
        self,
        f: impl Fn(&Cause<E>) -> Effect<X, Never> + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(ensuring_node(self.node, move |exit: &AnyExit| match exit {
            Exit::Success(_) => unit_node(),
            Exit::Failure(cause) => f(&cause.clone().map(unerase)).into_node(),
        }))
    }

    /// Runs `finalizer` if this effect is interrupted.
    pub fn on_interrupt<X: Value>(self, finalizer: Effect<X, Never>) -> Self {
        let finalizer = finalizer.into_node();
        Self::from_node(ensuring_node(self.node, move |exit: &AnyExit| match exit {
            Exit::Failure(cause) if cause.is_interrupted() => Arc::clone(&finalizer),
            _ => unit_node(),
        }))
    }

    /// Starts this effect on a child fiber of the current one.
    ///
    /// The child is interrupted when the parent finishes, unless it finished
    /// first.
    pub fn fork<E2: Value>(self) -> Effect<Fiber<A, E>, E2> {
        fork_node(self.node, false)
    }

    /// Starts this effect on a fiber with no parent.
    pub fn fork_daemon<E2: Value>(self) -> Effect<Fiber<A, E>, E2> {
        fork_node(self.node, true)
    }

    /// Sets the ambient concurrency used by [`Concurrency::Inherit`].
    pub fn with_concurrency(self, concurrency: Concurrency) -> Self {
        Self::from_node(Arc::new(Node::SetConcurrency {
            source: self.node,
            concurrency,
        }))
    }
}

fn fork_node<A: Value, E: Value, E2: Value>(source: NodeRef, daemon: bool) -> Effect<Fiber<A, E>, E2> {
    Effect::<Arc<FiberCell>, E2>::from_node(Arc::new(Node::Fork { source, daemon }))
        .map(Fiber::from_cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Ref;
    use crate::test_utils::test_runtime;
    use crate::types::ExitKind;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn ensuring_runs_on_success_and_failure() {
        init_test("ensuring_runs_on_success_and_failure");
        let runtime = test_runtime();
        let count = Ref::new(0u32);
        let bump = count.update::<Never>(|n| n + 1);
        let ok = Effect::<u8, String>::succeed(1).ensuring(bump.clone());
        let err = Effect::<u8, String>::fail("x".into()).ensuring(bump);
        assert_eq!(runtime.run_sync(ok).ok(), Some(1));
        assert_eq!(runtime.run_sync_exit(err), Exit::fail("x".to_string()));
        assert_eq!(count.get_now(), 2);
        crate::test_complete!("ensuring_runs_on_success_and_failure");
    }

    #[test]
    fn failing_finalizer_is_sequenced_after_original() {
        init_test("failing_finalizer_is_sequenced_after_original");
        let runtime = test_runtime();
        let effect = Effect::<u8, String>::fail("first".into())
            .ensuring(Effect::<(), Never>::die("finalizer"));
        let exit = runtime.run_sync_exit(effect);
        match exit.cause() {
            Some(Cause::Sequential(first, second)) => {
                assert_eq!(**first, Cause::Fail("first".to_string()));
                assert_eq!(second.kind(), ExitKind::Die);
            }
            other => panic!("unexpected cause {other:?}"),
        }
        crate::test_complete!("failing_finalizer_is_sequenced_after_original");
    }

    #[test]
    fn on_exit_and_on_error_see_outcome() {
        init_test("on_exit_and_on_error_see_outcome");
        let runtime = test_runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let seen = Arc::clone(&seen);
            move |kind: ExitKind| {
                let seen = Arc::clone(&seen);
                Effect::<(), Never>::sync(move || seen.lock().push((label, kind)))
            }
        };
        let note_exit = record("exit");
        let note_error = record("error");
        let effect = Effect::<u8, String>::fail("bad".into())
            .on_exit(move |exit| note_exit(exit.kind()))
            .on_error(move |cause| note_error(cause.kind()));
        let _ = runtime.run_sync_exit(effect);
        assert_eq!(
            *seen.lock(),
            vec![("exit", ExitKind::Fail), ("error", ExitKind::Fail)]
        );
        crate::test_complete!("on_exit_and_on_error_see_outcome");
    }

    #[test]
    fn uninterruptible_region_defers_interruption() {
        init_test("uninterruptible_region_defers_interruption");
        let runtime = test_runtime();
        let finished = Ref::new(false);
        let protected = Effect::<(), Never>::sleep(Duration::from_millis(40))
            .zip_right(finished.set(true))
            .uninterruptible();
        let program = protected.fork::<Never>().flat_map(|fiber| {
            Effect::<(), Never>::sleep(Duration::from_millis(5)).zip_right(fiber.interrupt())
        });
        let exit = runtime.run_sync(program).expect("interrupt returns the exit");
        assert!(exit.is_interrupted());
        assert!(finished.get_now(), "region must complete before interruption");
        crate::test_complete!("uninterruptible_region_defers_interruption");
    }

    #[test]
    fn restore_reenables_interruption() {
        init_test("restore_reenables_interruption");
        let runtime = test_runtime();
        let cleaned = Ref::new(false);
        let cleanup = cleaned.set(true);
        let masked = Effect::<(), Never>::uninterruptible_mask(move |restore| {
            restore
                .apply(Effect::<(), Never>::never())
                .on_interrupt(cleanup.clone())
        });
        let program = masked.fork::<Never>().flat_map(|fiber| {
            Effect::<(), Never>::sleep(Duration::from_millis(5)).zip_right(fiber.interrupt())
        });
        let exit = runtime.run_sync(program).expect("interrupt returns the exit");
        assert!(exit.is_interrupted());
        assert!(cleaned.get_now());
        crate::test_complete!("restore_reenables_interruption");
    }
}
