//! Bridges Rust futures into effects.
//!
//! A [`FutureTask`] owns a boxed future and polls it on the worker pool. Its
//! [`Waker`] re-queues a poll job, so no thread blocks while the future is
//! pending. When the future completes, the suspended fiber is resumed with the
//! result; interrupting the fiber drops the future.

use crate::effect::node::{die_node, fail_node, succeed_node, Canceler};
use crate::runtime::fiber_cell::RawResume;
use crate::runtime::scheduler::Job;
use crate::types::{AnyCause, AnyValue, Defect};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type BoxedFuture = Pin<Box<dyn Future<Output = Result<AnyValue, AnyCause>> + Send>>;

pub(crate) struct FutureTask {
    future: Mutex<Option<BoxedFuture>>,
    resume: RawResume,
}

impl FutureTask {
    /// Starts polling `future` and returns a canceler that drops it.
    pub(crate) fn start(resume: RawResume, future: BoxedFuture) -> Canceler {
        let task = Arc::new(Self {
            future: Mutex::new(Some(future)),
            resume,
        });
        task.schedule();
        Canceler::new(move || {
            let dropped = task.future.lock().take();
            drop(dropped);
        })
    }

    fn schedule(self: &Arc<Self>) {
        let task = Arc::clone(self);
        let scheduler = &self.resume.fiber().runtime().scheduler;
        // A rejected poll means the runtime is gone; dropping it drops the future.
        drop(scheduler.schedule(Job::Task(Box::new(move || task.poll()))));
    }

    fn poll(self: &Arc<Self>) {
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let node = match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(Ok(value))) => succeed_node(value),
            Ok(Poll::Ready(Err(cause))) => fail_node(cause),
            Err(payload) => die_node(Defect::from_panic(payload).message().to_string()),
        };
        let finished = slot.take();
        drop(slot);
        drop(finished);
        self.resume.resume_node(node);
    }
}

impl Wake for FutureTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
