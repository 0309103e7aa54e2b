//! Handles for observing the exit of a root fiber from outside the runtime.
//!
//! [`ExitFuture`] is returned by [`Runtime::run_future`](super::Runtime::run_future)
//! and resolves to the fiber's [`Exit`]. Dropping the future does not stop the
//! fiber; it only stops observing it. [`ExitSlot`] is the blocking counterpart
//! used by `run_sync`.

use crate::types::{AnyExit, Exit, FiberId, Value};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct FutureSlot {
    exit: Option<AnyExit>,
    waker: Option<Waker>,
}

/// A future resolving to the exit of a fiber started with `run_future`.
#[must_use = "futures do nothing unless polled"]
pub struct ExitFuture<A, E> {
    fiber: FiberId,
    slot: Arc<Mutex<FutureSlot>>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A: Value, E: Value> ExitFuture<A, E> {
    pub(crate) fn pending(fiber: FiberId) -> (Self, ExitCompleter) {
        let slot = Arc::new(Mutex::new(FutureSlot {
            exit: None,
            waker: None,
        }));
        let completer = ExitCompleter {
            slot: Arc::clone(&slot),
        };
        (
            Self {
                fiber,
                slot,
                _marker: PhantomData,
            },
            completer,
        )
    }

    pub(crate) fn ready(fiber: FiberId, exit: Exit<A, E>) -> Self {
        let (future, completer) = Self::pending(fiber);
        completer.complete(&exit.into_any());
        future
    }

    /// The id of the fiber being observed.
    #[must_use]
    pub const fn fiber_id(&self) -> FiberId {
        self.fiber
    }

    /// Returns true if the fiber has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot.lock().exit.is_some()
    }
}

impl<A: Value, E: Value> Future for ExitFuture<A, E> {
    type Output = Exit<A, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.exit.take() {
            Some(exit) => Poll::Ready(Exit::from_any(exit)),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<A, E> std::fmt::Debug for ExitFuture<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitFuture")
            .field("fiber", &self.fiber)
            .finish_non_exhaustive()
    }
}

/// Write side of an [`ExitFuture`].
pub(crate) struct ExitCompleter {
    slot: Arc<Mutex<FutureSlot>>,
}

impl ExitCompleter {
    pub(crate) fn complete(&self, exit: &AnyExit) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.exit = Some(exit.clone());
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// A one-shot exit cell that a thread can block on.
pub(crate) struct ExitSlot {
    exit: Mutex<Option<AnyExit>>,
    filled: Condvar,
}

impl ExitSlot {
    pub(crate) fn new() -> Self {
        Self {
            exit: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    pub(crate) fn fill(&self, exit: AnyExit) {
        *self.exit.lock() = Some(exit);
        self.filled.notify_all();
    }

    pub(crate) fn wait(&self) -> AnyExit {
        let mut guard = self.exit.lock();
        loop {
            if let Some(exit) = guard.take() {
                return exit;
            }
            self.filled.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cause;

    #[test]
    fn ready_future_resolves_immediately() {
        let future: ExitFuture<i32, String> = ExitFuture::ready(FiberId::NONE, Exit::succeed(7));
        assert!(future.is_finished());
        assert_eq!(futures_lite::future::block_on(future), Exit::succeed(7));
    }

    #[test]
    fn completer_wakes_pending_future() {
        let (future, completer) = ExitFuture::<u8, String>::pending(FiberId::new_for_test(5));
        assert_eq!(future.fiber_id(), FiberId::new_for_test(5));
        let handle = std::thread::spawn(move || futures_lite::future::block_on(future));
        std::thread::sleep(std::time::Duration::from_millis(10));
        completer.complete(&Exit::<u8, String>::fail("nope".to_string()).into_any());
        let exit = handle.join().unwrap();
        assert_eq!(exit, Exit::Failure(Cause::Fail("nope".to_string())));
    }

    #[test]
    fn slot_blocks_until_filled() {
        let slot = Arc::new(ExitSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                slot.fill(Exit::<(), ()>::succeed(()).into_any());
            })
        };
        assert!(slot.wait().is_success());
        writer.join().unwrap();
    }
}
