//! Handles to running fibers.
//!
//! A [`Fiber`] is returned by [`Effect::fork`], [`Effect::fork_daemon`] and
//! [`Runtime::run_fork`](crate::Runtime::run_fork). It can be joined, awaited
//! or interrupted from another effect, or polled from plain code.
//!
//! Handles compose: [`Fiber::zip`], [`Fiber::zip_with`] and [`Fiber::or_else`]
//! build a handle over two fibers. Joining it joins both, and interrupting it
//! interrupts both and waits for both.

use crate::effect::node::{async_node, exit_node, unit_node, with_fiber_node, Canceler, NodeRef};
use crate::effect::Effect;
use crate::runtime::fiber_cell::{await_done, FiberCell};
use crate::types::{Exit, FiberId, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub use crate::runtime::fiber_cell::FiberStatus;

/// A handle to a fiber that produces `A` or fails with `E`.
pub struct Fiber<A, E> {
    handle: Handle<A, E>,
    _marker: PhantomData<fn() -> (A, E)>,
}

enum Handle<A, E> {
    Single(Arc<FiberCell>),
    Composite(Arc<Composite<A, E>>),
}

/// Two or more fibers observed through one handle.
struct Composite<A, E> {
    id: FiberId,
    /// Every underlying fiber, flattened.
    parts: Vec<Arc<FiberCell>>,
    poll: Box<dyn Fn() -> Option<Exit<A, E>> + Send + Sync>,
    join: Box<dyn Fn() -> Effect<A, E> + Send + Sync>,
}

impl<A: Value, E: Value> Fiber<A, E> {
    pub(crate) fn from_cell(cell: Arc<FiberCell>) -> Self {
        Self::from_handle(Handle::Single(cell))
    }

    fn from_handle(handle: Handle<A, E>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// The fiber's identifier. Composite handles get an identifier of their own.
    pub fn id(&self) -> FiberId {
        match &self.handle {
            Handle::Single(cell) => cell.id(),
            Handle::Composite(composite) => composite.id,
        }
    }

    /// The fiber's current lifecycle state.
    ///
    /// A composite handle is `Done` once every part is done, and `Running`
    /// while any part is running.
    pub fn status(&self) -> FiberStatus {
        match &self.handle {
            Handle::Single(cell) => cell.status(),
            Handle::Composite(composite) => {
                let statuses: Vec<FiberStatus> =
                    composite.parts.iter().map(|cell| cell.status()).collect();
                if statuses.iter().all(|s| *s == FiberStatus::Done) {
                    FiberStatus::Done
                } else if statuses.contains(&FiberStatus::Running) {
                    FiberStatus::Running
                } else {
                    FiberStatus::Suspended
                }
            }
        }
    }

    /// The exit, if the fiber has finished.
    pub fn poll(&self) -> Option<Exit<A, E>> {
        match &self.handle {
            Handle::Single(cell) => cell.exit().map(Exit::from_any),
            Handle::Composite(composite) => (composite.poll)(),
        }
    }

    /// Waits for the fiber and continues with its outcome, re-raising its
    /// cause on failure.
    pub fn join(&self) -> Effect<A, E> {
        match &self.handle {
            Handle::Single(cell) => Effect::from_node(await_node(Arc::clone(cell))),
            Handle::Composite(composite) => (composite.join)(),
        }
    }

    /// Waits for the fiber and returns its exit as a value.
    pub fn await_exit<E2: Value>(&self) -> Effect<Exit<A, E>, E2> {
        match &self.handle {
            Handle::Single(_) => self.join().exit(),
            Handle::Composite(composite) => {
                let settled = Effect::<(), E2>::from_node(await_done(composite.parts.clone()));
                settled.zip_right(self.join().exit())
            }
        }
    }

    /// Interrupts the fiber on behalf of the calling fiber and waits until it
    /// is done, finalizers included. Returns its exit.
    pub fn interrupt<E2: Value>(&self) -> Effect<Exit<A, E>, E2> {
        self.interrupt_fork().zip_right(self.await_exit())
    }

    /// Requests interruption without waiting for the fiber to finish.
    pub fn interrupt_fork<E2: Value>(&self) -> Effect<(), E2> {
        let cells = self.cells();
        Effect::from_node(with_fiber_node(move |view| {
            for cell in &cells {
                cell.request_interrupt(view.id());
            }
            unit_node()
        }))
    }

    /// Combines two fibers into one producing both values.
    pub fn zip<B: Value>(&self, that: &Fiber<B, E>) -> Fiber<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Combines two fibers with `f`.
    ///
    /// Joining the result joins `self`, then `that`. If both fail, the causes
    /// are combined in parallel.
    pub fn zip_with<B: Value, C: Value>(
        &self,
        that: &Fiber<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Fiber<C, E> {
        let f = Arc::new(f);
        let (left, right) = (self.clone(), that.clone());
        let poll = {
            let (left, right, f) = (left.clone(), right.clone(), Arc::clone(&f));
            move || match (left.poll()?, right.poll()?) {
                (Exit::Success(a), Exit::Success(b)) => Some(Exit::Success(f(a, b))),
                (Exit::Failure(l), Exit::Failure(r)) => Some(Exit::Failure(l.both(r))),
                (Exit::Failure(cause), _) | (_, Exit::Failure(cause)) => {
                    Some(Exit::Failure(cause))
                }
            }
        };
        let join = move || {
            let f = Arc::clone(&f);
            left.join().zip_with(right.join(), move |a, b| f(a, b))
        };
        Fiber::from_handle(Handle::Composite(Arc::new(Composite {
            id: FiberId::next(),
            parts: merge_parts(self.cells(), that.cells()),
            poll: Box::new(poll),
            join: Box::new(join),
        })))
    }

    /// A fiber that produces this fiber's value, or `that`'s outcome if this
    /// one does not succeed.
    pub fn or_else(&self, that: &Self) -> Self {
        let (left, right) = (self.clone(), that.clone());
        let poll = {
            let (left, right) = (left.clone(), right.clone());
            move || match left.poll()? {
                Exit::Success(value) => Some(Exit::Success(value)),
                Exit::Failure(_) => right.poll(),
            }
        };
        let join = move || {
            let right = right.clone();
            left.join().fold_cause_effect(move |_| right.join(), Effect::succeed)
        };
        Self::from_handle(Handle::Composite(Arc::new(Composite {
            id: FiberId::next(),
            parts: merge_parts(self.cells(), that.cells()),
            poll: Box::new(poll),
            join: Box::new(join),
        })))
    }

    fn cells(&self) -> Vec<Arc<FiberCell>> {
        match &self.handle {
            Handle::Single(cell) => vec![Arc::clone(cell)],
            Handle::Composite(composite) => composite.parts.clone(),
        }
    }
}

fn merge_parts(mut left: Vec<Arc<FiberCell>>, right: Vec<Arc<FiberCell>>) -> Vec<Arc<FiberCell>> {
    for cell in right {
        if !left.iter().any(|known| known.id() == cell.id()) {
            left.push(cell);
        }
    }
    left
}

/// Suspends until `cell` is done, then continues with its exit.
fn await_node(cell: Arc<FiberCell>) -> NodeRef {
    async_node(move |resume| {
        let key = cell.add_observer(Box::new(move |exit| {
            resume.resume_node(exit_node(exit));
        }));
        let cell = Arc::clone(&cell);
        key.map(|key| Canceler::new(move || cell.remove_observer(key)))
    })
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        let handle = match &self.handle {
            Handle::Single(cell) => Handle::Single(Arc::clone(cell)),
            Handle::Composite(composite) => Handle::Composite(Arc::clone(composite)),
        };
        Self {
            handle,
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            Handle::Single(cell) => f
                .debug_struct("Fiber")
                .field("id", &cell.id())
                .field("status", &cell.status())
                .finish(),
            Handle::Composite(composite) => f
                .debug_struct("Fiber")
                .field("id", &composite.id)
                .field("parts", &composite.parts.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Ref;
    use crate::test_utils::test_runtime;
    use crate::types::{Cause, Never};
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn join_returns_child_value_and_cause() {
        init_test("join_returns_child_value_and_cause");
        let runtime = test_runtime();
        let ok = Effect::<u32, String>::succeed(4)
            .fork::<String>()
            .flat_map(|fiber| fiber.join());
        assert_eq!(runtime.run_sync(ok).ok(), Some(4));

        let failing = Effect::<u32, String>::fail("child".into())
            .fork::<String>()
            .flat_map(|fiber| fiber.join());
        assert_eq!(runtime.run_sync_exit(failing), Exit::fail("child".to_string()));
        crate::test_complete!("join_returns_child_value_and_cause");
    }

    #[test]
    fn interrupt_records_the_interrupter() {
        init_test("interrupt_records_the_interrupter");
        let runtime = test_runtime();
        let program = Effect::<(), Never>::never()
            .fork::<Never>()
            .zip(Effect::<FiberId, Never>::fiber_id())
            .flat_map(|(fiber, me)| fiber.interrupt().map(move |exit| (exit, me)));
        let (exit, me) = runtime.run_sync(program).expect("interrupt returns the exit");
        match exit.cause() {
            Some(Cause::Interrupt(by)) => assert_eq!(*by, me),
            other => panic!("unexpected cause {other:?}"),
        }
        crate::test_complete!("interrupt_records_the_interrupter");
    }

    #[test]
    fn parent_exit_interrupts_attached_children() {
        init_test("parent_exit_interrupts_attached_children");
        let runtime = test_runtime();
        let cleaned = Ref::new(false);
        let child = Effect::<(), Never>::never().on_interrupt(cleaned.set(true));
        let parent = child.fork::<Never>().as_unit();
        runtime.run_sync(parent).expect("parent succeeds");
        assert!(cleaned.get_now(), "child finalizer must run before the parent completes");
        crate::test_complete!("parent_exit_interrupts_attached_children");
    }

    #[test]
    fn daemon_outlives_parent() {
        init_test("daemon_outlives_parent");
        let runtime = test_runtime();
        let daemon = runtime
            .run_sync(
                Effect::<u8, Never>::succeed(9)
                    .delay(Duration::from_millis(30))
                    .fork_daemon::<Never>(),
            )
            .expect("fork succeeds");
        assert!(daemon.poll().is_none());
        let exit = runtime.run_sync_exit(daemon.await_exit::<Never>());
        assert_eq!(exit, Exit::Success(Exit::Success(9)));
        assert_eq!(daemon.status(), FiberStatus::Done);
        assert_eq!(daemon.poll(), Some(Exit::Success(9)));
        crate::test_complete!("daemon_outlives_parent");
    }

    #[test]
    fn interrupt_fork_does_not_wait() {
        init_test("interrupt_fork_does_not_wait");
        let runtime = test_runtime();
        let program = Effect::<(), Never>::sleep(Duration::from_millis(50))
            .uninterruptible()
            .fork_daemon::<Never>()
            .flat_map(|fiber| fiber.interrupt_fork().as_value(fiber));
        let fiber = runtime.run_sync(program).expect("forks");
        assert!(fiber.poll().is_none(), "uninterruptible sleep is still running");
        let exit = runtime.run_sync(fiber.await_exit::<Never>()).expect("awaits");
        assert!(exit.is_interrupted());
        crate::test_complete!("interrupt_fork_does_not_wait");
    }

    #[test]
    fn zip_joins_both_fibers() {
        init_test("zip_joins_both_fibers");
        let runtime = test_runtime();
        let slow = Effect::<u32, String>::succeed(1).delay(Duration::from_millis(10));
        let fast = Effect::<&'static str, String>::succeed("b");
        let program = slow
            .fork_daemon::<String>()
            .zip(fast.fork_daemon::<String>())
            .map(|(left, right)| left.zip(&right));
        let both = runtime.run_sync(program).expect("forks");
        assert_eq!(runtime.run_sync(both.join()).ok(), Some((1, "b")));
        assert_eq!(both.status(), FiberStatus::Done);
        assert_eq!(both.poll(), Some(Exit::Success((1, "b"))));
        crate::test_complete!("zip_joins_both_fibers");
    }

    #[test]
    fn zip_with_combines_failures_once_both_finish() {
        init_test("zip_with_combines_failures_once_both_finish");
        let runtime = test_runtime();
        let left = Effect::<u32, String>::fail("left".into());
        let right = Effect::<u32, String>::fail("right".into()).delay(Duration::from_millis(10));
        let program = left
            .fork_daemon::<Never>()
            .zip(right.fork_daemon::<Never>())
            .map(|(left, right)| left.zip_with(&right, |a, b| a + b));
        let sum = runtime.run_sync(program).expect("forks");
        let exit = runtime.run_sync(sum.await_exit::<Never>()).expect("awaits");
        assert_eq!(exit, Exit::fail("left".to_string()));
        match sum.poll() {
            Some(Exit::Failure(cause)) => {
                assert_eq!(cause.failures(), vec!["left", "right"]);
            }
            other => panic!("expected both failures, got {other:?}"),
        }
        crate::test_complete!("zip_with_combines_failures_once_both_finish");
    }

    #[test]
    fn or_else_falls_back_to_second_fiber() {
        init_test("or_else_falls_back_to_second_fiber");
        let runtime = test_runtime();
        let fallback = |first: Effect<u32, String>| {
            first
                .fork::<String>()
                .zip(Effect::<u32, String>::succeed(5).fork::<String>())
                .flat_map(|(first, second)| first.or_else(&second).join())
        };
        assert_eq!(runtime.run_sync(fallback(Effect::fail("down".into()))).ok(), Some(5));
        assert_eq!(runtime.run_sync(fallback(Effect::succeed(1))).ok(), Some(1));
        crate::test_complete!("or_else_falls_back_to_second_fiber");
    }

    #[test]
    fn interrupting_a_zipped_fiber_interrupts_both() {
        init_test("interrupting_a_zipped_fiber_interrupts_both");
        let runtime = test_runtime();
        let cleaned = Ref::new(0u32);
        let waiting = || Effect::<(), Never>::never().on_interrupt(cleaned.update(|n| n + 1));
        let program = waiting()
            .fork_daemon::<Never>()
            .zip(waiting().fork_daemon::<Never>())
            .flat_map(|(left, right)| left.zip(&right).interrupt());
        let exit = runtime.run_sync(program).expect("interrupt returns the exit");
        assert!(exit.is_interrupted(), "expected an interruption, got {exit:?}");
        assert_eq!(cleaned.get_now(), 2, "both finalizers ran before interrupt returned");
        crate::test_complete!("interrupting_a_zipped_fiber_interrupts_both");
    }
}
