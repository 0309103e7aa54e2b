//! Leaf effects.

use super::node::{
    async_node, die_node, exit_node, fail_node, succeed_node, suspend_node, sync_node, unit_node,
    with_fiber_node, Canceler, Node,
};
use super::Effect;
use crate::runtime::fiber_cell::RawResume;
use crate::runtime::waker::FutureTask;
use crate::tracing_compat::LogLevel;
use crate::types::{erase, Cause, Defect, Exit, FiberId, Value};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

impl<A: Value, E: Value> Effect<A, E> {
    /// An effect that succeeds with `value`.
    ///
    /// The value is cloned on every run.
    pub fn succeed(value: A) -> Self {
        Self::from_node(succeed_node(erase(value)))
    }

    /// An effect that fails with the expected error `error`.
    pub fn fail(error: E) -> Self {
        Self::fail_cause(Cause::Fail(error))
    }

    /// An effect that fails with `cause`.
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_node(fail_node(cause.map(erase)))
    }

    /// An effect that dies with an unexpected defect.
    pub fn die(message: impl Into<String>) -> Self {
        Self::from_node(die_node(message))
    }

    /// Runs `thunk` when the effect runs. A panic becomes a defect.
    pub fn sync(thunk: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::from_node(sync_node(move || Ok(erase(thunk()))))
    }

    /// Runs a fallible `thunk`. `Err` becomes an expected failure; a panic a
    /// defect.
    pub fn try_sync(thunk: impl Fn() -> Result<A, E> + Send + Sync + 'static) -> Self {
        Self::from_node(sync_node(move || {
            thunk().map(erase).map_err(|e| Cause::Fail(erase(e)))
        }))
    }

    /// Runs `thunk`, converting a panic into an expected failure with
    /// `on_panic`.
    pub fn try_catch(
        thunk: impl Fn() -> A + Send + Sync + 'static,
        on_panic: impl Fn(Defect) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(sync_node(move || match catch_unwind(AssertUnwindSafe(&thunk)) {
            Ok(value) => Ok(erase(value)),
            Err(payload) => Err(Cause::Fail(erase(on_panic(Defect::from_panic(payload))))),
        }))
    }

    /// Suspends the fiber until `register`'s [`Resume`] is called.
    ///
    /// `register` runs when the effect runs. The first call on the resume
    /// handle continues the fiber; later calls are ignored. If the fiber is
    /// interrupted first, the returned [`Canceler`] (if any) is invoked.
    pub fn async_effect(
        register: impl Fn(Resume<A, E>) -> Option<Canceler> + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(async_node(move |raw| register(Resume::new(raw))))
    }

    /// Builds the effect to run lazily, each time it runs.
    pub fn suspend(make: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        Self::from_node(suspend_node(move || make().into_node()))
    }

    /// An effect that never completes unless interrupted.
    pub fn never() -> Self {
        Self::from_node(async_node(|_| None))
    }

    /// Interrupts the running fiber.
    pub fn interrupt() -> Self {
        Self::from_node(with_fiber_node(|view| {
            view.fiber.self_interrupt();
            fail_node(Cause::Interrupt(view.id()))
        }))
    }

    /// Wraps a future. A panic while polling becomes a defect.
    ///
    /// `make` is called on every run; the future is polled on the runtime's
    /// workers and dropped if the fiber is interrupted.
    pub fn from_future<F>(make: impl Fn() -> F + Send + Sync + 'static) -> Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        Self::from_node(async_node(move |resume| {
            let future = make();
            Some(FutureTask::start(
                resume,
                Box::pin(async move { Ok(erase(future.await)) }),
            ))
        }))
    }

    /// Wraps a fallible future; `Err` becomes an expected failure.
    pub fn try_future<F>(make: impl Fn() -> F + Send + Sync + 'static) -> Self
    where
        F: Future<Output = Result<A, E>> + Send + 'static,
    {
        Self::from_node(async_node(move |resume| {
            let future = make();
            Some(FutureTask::start(
                resume,
                Box::pin(async move {
                    future
                        .await
                        .map(erase)
                        .map_err(|e| Cause::Fail(erase(e)))
                }),
            ))
        }))
    }

    /// Waits for `duration`, then runs this effect.
    pub fn delay(self, duration: Duration) -> Self {
        Effect::<(), E>::sleep(duration).zip_right(self)
    }
}

impl<E: Value> Effect<(), E> {
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Self::from_node(unit_node())
    }

    /// Suspends the fiber for `duration` without blocking a worker.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_node(Arc::new(Node::Sleep(duration)))
    }

    /// Gives other fibers a chance to run.
    pub fn yield_now() -> Self {
        Self::from_node(Arc::new(Node::Yield))
    }

    /// Logs `message` at info level, tagged with the current fiber.
    pub fn log(message: impl Into<String>) -> Self {
        Self::log_with(LogLevel::Info, message)
    }

    /// Logs `message` at debug level.
    pub fn log_debug(message: impl Into<String>) -> Self {
        Self::log_with(LogLevel::Debug, message)
    }

    /// Logs `message` at warning level.
    pub fn log_warn(message: impl Into<String>) -> Self {
        Self::log_with(LogLevel::Warning, message)
    }

    /// Logs `message` at error level.
    pub fn log_error(message: impl Into<String>) -> Self {
        Self::log_with(LogLevel::Error, message)
    }

    /// Logs `message` at `level`.
    pub fn log_with(level: LogLevel, message: impl Into<String>) -> Self {
        let message: Arc<str> = Arc::from(message.into());
        Self::from_node(with_fiber_node(move |view| {
            level.emit(view.id(), &message);
            unit_node()
        }))
    }
}

impl<E: Value> Effect<FiberId, E> {
    /// The id of the fiber running this effect.
    pub fn fiber_id() -> Self {
        Self::from_node(with_fiber_node(|view| succeed_node(erase(view.id()))))
    }
}

/// One-shot handle that continues a fiber suspended by
/// [`Effect::async_effect`].
///
/// Clones share the same one-shot slot. Every method returns `true` if this
/// call resumed the fiber and `false` if the fiber was already resumed or
/// has moved on (for example because it was interrupted).
pub struct Resume<A, E> {
    raw: RawResume,
    _marker: PhantomData<fn(A, E)>,
}

impl<A: Value, E: Value> Resume<A, E> {
    const fn new(raw: RawResume) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Continues the fiber with `effect`.
    pub fn resume(&self, effect: Effect<A, E>) -> bool {
        self.raw.resume_node(effect.into_node())
    }

    /// Continues the fiber with a successful value.
    pub fn succeed(&self, value: A) -> bool {
        self.raw.resume_node(succeed_node(erase(value)))
    }

    /// Continues the fiber with an expected failure.
    pub fn fail(&self, error: E) -> bool {
        self.raw.resume_node(fail_node(Cause::Fail(erase(error))))
    }

    /// Continues the fiber with a defect.
    pub fn die(&self, message: impl Into<String>) -> bool {
        self.raw.resume_node(die_node(message))
    }

    /// Continues the fiber with `exit`.
    pub fn complete(&self, exit: Exit<A, E>) -> bool {
        self.raw.resume_node(exit_node(&exit.into_any()))
    }

    /// The fiber waiting on this handle.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.raw.fiber().id()
    }
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> std::fmt::Debug for Resume<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resume")
            .field("fiber", &self.raw.fiber().id())
            .finish()
    }
}
