//! Shared state of a running fiber.
//!
//! A [`FiberCell`] is owned jointly by the scheduler (while queued), by handles
//! ([`Fiber`](crate::fiber::Fiber)), by its parent (while attached) and by any
//! [`RawResume`] waiting to wake it. All mutable state sits behind one mutex;
//! the interrupt flag is an atomic so the run loop can check it on every step
//! without locking.
//!
//! Lifecycle: `Running` (queued or on a worker) -> `Suspended` (parked on an
//! asynchronous operation) -> `Running` -> ... -> `Done`. The exit is published
//! exactly once, after which observers are notified outside the lock.

use crate::combinator::join::Concurrency;
use crate::context::Context;
use crate::effect::node::{async_node, unit_node, Canceler, NodeRef, Register};
use crate::runtime::interpreter::{self, Next, RunState, Step};
use crate::runtime::scheduler::Job;
use crate::runtime::RuntimeShared;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{AnyExit, Cause, Defect, Exit, ExitKind, FiberId};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Observable lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberStatus {
    /// Queued or executing on a worker.
    Running,
    /// Parked on an asynchronous operation.
    Suspended,
    /// Finished; the exit is available.
    Done,
}

pub(crate) type Observer = Box<dyn FnOnce(&AnyExit) + Send>;

struct Pending {
    epoch: u64,
    canceler: Option<Canceler>,
    /// False while the registration callback is still running.
    parked: bool,
}

struct FiberState {
    status: FiberStatus,
    run: Option<Box<RunState>>,
    pending: Option<Pending>,
    /// A resumption that arrived before the fiber finished parking.
    early: Option<NodeRef>,
    epoch: u64,
    interruptor: Option<FiberId>,
    suspended_interruptible: bool,
    children: Vec<Arc<FiberCell>>,
    parent: Option<Weak<FiberCell>>,
    exit: Option<AnyExit>,
    observers: Vec<(u64, Observer)>,
    next_observer: u64,
}

pub(crate) struct FiberCell {
    id: FiberId,
    runtime: Arc<RuntimeShared>,
    interrupted: AtomicBool,
    state: Mutex<FiberState>,
}

impl FiberCell {
    pub(crate) fn new(
        runtime: Arc<RuntimeShared>,
        node: NodeRef,
        env: Context,
        concurrency: Concurrency,
        parent: Option<&Arc<Self>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::next(),
            runtime,
            interrupted: AtomicBool::new(false),
            state: Mutex::new(FiberState {
                status: FiberStatus::Running,
                run: Some(Box::new(RunState::new(node, env, concurrency))),
                pending: None,
                early: None,
                epoch: 0,
                interruptor: None,
                suspended_interruptible: false,
                children: Vec::new(),
                parent: parent.map(Arc::downgrade),
                exit: None,
                observers: Vec::new(),
                next_observer: 0,
            }),
        })
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.state.lock().status
    }

    pub(crate) fn exit(&self) -> Option<AnyExit> {
        self.state.lock().exit.clone()
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// The fiber that first requested interruption, or this fiber itself.
    pub(crate) fn interruptor(&self) -> FiberId {
        self.state.lock().interruptor.unwrap_or(self.id)
    }

    /// Creates a child fiber. The child is not scheduled until [`start`](Self::start).
    ///
    /// Attached children are interrupted when this fiber finishes; daemons are not.
    pub(crate) fn fork(
        self: &Arc<Self>,
        node: NodeRef,
        env: Context,
        concurrency: Concurrency,
        attached: bool,
    ) -> Arc<Self> {
        let parent = attached.then_some(self);
        let child = Self::new(Arc::clone(&self.runtime), node, env, concurrency, parent);
        debug!(parent = %self.id, child = %child.id, daemon = !attached, "fiber forked");
        if attached && !self.add_child(Arc::clone(&child)) {
            child.request_interrupt(self.id);
        }
        child
    }

    /// Queues the fiber for its first turn.
    pub(crate) fn start(self: &Arc<Self>) {
        self.enqueue(false);
    }

    fn enqueue(self: &Arc<Self>, interrupt_lane: bool) {
        let job = Job::Fiber(Arc::clone(self));
        let rejected = if interrupt_lane {
            self.runtime.scheduler.schedule_interrupt(job)
        } else {
            self.runtime.scheduler.schedule(job)
        };
        if rejected.is_some() {
            self.complete(Exit::Failure(Cause::Die(
                Defect::new("runtime is shut down").with_fiber(self.id),
            )));
        }
    }

    /// Runs the fiber until it suspends, yields, exhausts its budget or finishes.
    pub(crate) fn run_turn(self: &Arc<Self>) {
        let mut run = {
            let mut st = self.state.lock();
            match st.run.take() {
                Some(run) => {
                    st.status = FiberStatus::Running;
                    run
                }
                None => return,
            }
        };
        let budget = self.runtime.config.ops_budget;
        let mut ops: u32 = 0;
        loop {
            match interpreter::step(self, &mut run) {
                Next::Continue => {
                    ops += 1;
                    if ops >= budget {
                        trace!(fiber = %self.id, ops, "ops budget exhausted, yielding");
                        self.park_ready(run);
                        return;
                    }
                }
                Next::Yield => {
                    self.park_ready(run);
                    return;
                }
                Next::Suspend(register) => match self.suspend(run, &register) {
                    Some(resumed) => {
                        run = resumed;
                        ops += 1;
                    }
                    None => return,
                },
                Next::Finished(exit) => {
                    self.complete(exit);
                    return;
                }
            }
        }
    }

    fn park_ready(self: &Arc<Self>, run: Box<RunState>) {
        {
            let mut st = self.state.lock();
            st.run = Some(run);
            st.status = FiberStatus::Running;
        }
        self.enqueue(false);
    }

    /// Registers an asynchronous callback and parks the fiber.
    ///
    /// Returns the run state back when the fiber can continue immediately:
    /// the callback resumed synchronously, it panicked, or an interruption is
    /// already pending.
    fn suspend(self: &Arc<Self>, mut run: Box<RunState>, register: &Register) -> Option<Box<RunState>> {
        let epoch = {
            let mut st = self.state.lock();
            st.epoch += 1;
            st.pending = Some(Pending {
                epoch: st.epoch,
                canceler: None,
                parked: false,
            });
            st.epoch
        };
        let resume = RawResume::new(Arc::clone(self), epoch);
        let canceler = match catch_unwind(AssertUnwindSafe(|| register(resume))) {
            Ok(canceler) => canceler,
            Err(payload) => {
                self.state.lock().pending = None;
                let defect = Defect::from_panic(payload).with_fiber(self.id);
                run.current = Step::Done(Exit::Failure(Cause::Die(defect)));
                return Some(run);
            }
        };

        let mut st = self.state.lock();
        if let Some(node) = st.early.take() {
            drop(st);
            drop(canceler);
            run.current = Step::Eval(node);
            return Some(run);
        }
        if run.interruptible && self.is_interrupted() {
            st.pending = None;
            let by = st.interruptor.unwrap_or(self.id);
            drop(st);
            if let Some(canceler) = canceler {
                canceler.cancel();
            }
            run.current = Step::Done(Exit::Failure(Cause::Interrupt(by)));
            return Some(run);
        }
        if let Some(pending) = st.pending.as_mut() {
            pending.canceler = canceler;
            pending.parked = true;
        }
        st.suspended_interruptible = run.interruptible;
        st.status = FiberStatus::Suspended;
        st.run = Some(run);
        trace!(fiber = %self.id, epoch, "fiber suspended");
        None
    }

    /// Delivers the result of an asynchronous operation.
    fn resume_with(self: &Arc<Self>, epoch: u64, node: NodeRef) -> bool {
        let (accepted, reschedule, stale_canceler) = {
            let mut st = self.state.lock();
            let current = st.pending.as_ref().is_some_and(|p| p.epoch == epoch);
            if !current {
                (false, false, None)
            } else if let Some(pending) = st.pending.take() {
                if pending.parked {
                    if let Some(run) = st.run.as_mut() {
                        run.current = Step::Eval(node);
                    }
                    st.status = FiberStatus::Running;
                    (true, true, pending.canceler)
                } else {
                    st.early = Some(node);
                    (true, false, None)
                }
            } else {
                (false, false, None)
            }
        };
        drop(stale_canceler);
        if !accepted {
            trace!(fiber = %self.id, epoch, "ignoring stale resume");
        }
        if reschedule {
            self.enqueue(false);
        }
        accepted
    }

    /// Marks the fiber as interrupted by `by`.
    ///
    /// A fiber parked in an interruptible region is woken immediately on the
    /// interrupt lane and its in-flight operation is cancelled. Otherwise the
    /// run loop observes the flag at its next interruptible step.
    pub(crate) fn request_interrupt(self: &Arc<Self>, by: FiberId) {
        let canceler = {
            let mut st = self.state.lock();
            if st.exit.is_some() {
                return;
            }
            if st.interruptor.is_none() {
                st.interruptor = Some(by);
            }
            self.interrupted.store(true, Ordering::Release);
            debug!(fiber = %self.id, by = %by, "interruption requested");
            if st.status != FiberStatus::Suspended || !st.suspended_interruptible {
                return;
            }
            let Some(pending) = st.pending.take() else {
                return;
            };
            let by = st.interruptor.unwrap_or(by);
            if let Some(run) = st.run.as_mut() {
                run.current = Step::Done(Exit::Failure(Cause::Interrupt(by)));
            }
            st.status = FiberStatus::Running;
            pending.canceler
        };
        if let Some(canceler) = canceler {
            canceler.cancel();
        }
        self.enqueue(true);
    }

    /// Marks this fiber as interrupting itself.
    pub(crate) fn self_interrupt(&self) {
        let mut st = self.state.lock();
        if st.interruptor.is_none() {
            st.interruptor = Some(self.id);
        }
        self.interrupted.store(true, Ordering::Release);
    }

    /// Publishes the exit and notifies observers. Later calls are ignored.
    pub(crate) fn complete(self: &Arc<Self>, exit: AnyExit) {
        let (observers, parent, leftover) = {
            let mut st = self.state.lock();
            if st.exit.is_some() {
                return;
            }
            st.status = FiberStatus::Done;
            st.exit = Some(exit.clone());
            st.early = None;
            let leftover = (st.run.take(), st.pending.take());
            (std::mem::take(&mut st.observers), st.parent.take(), leftover)
        };
        drop(leftover);
        if let Some(parent) = parent.and_then(|p| p.upgrade()) {
            parent.remove_child(self.id);
        }
        match exit.kind() {
            ExitKind::Die => {
                if let Exit::Failure(cause) = &exit {
                    warn!(fiber = %self.id, cause = %cause.pretty(), "fiber died");
                }
            }
            kind => debug!(fiber = %self.id, kind = %kind, "fiber finished"),
        }
        for (_, observer) in observers {
            observer(&exit);
        }
    }

    /// Registers a completion callback. Runs it immediately if already done.
    ///
    /// Returns a key for [`remove_observer`](Self::remove_observer), or `None`
    /// if the callback already ran.
    pub(crate) fn add_observer(&self, observer: Observer) -> Option<u64> {
        let mut st = self.state.lock();
        if let Some(exit) = st.exit.clone() {
            drop(st);
            observer(&exit);
            return None;
        }
        let key = st.next_observer;
        st.next_observer += 1;
        st.observers.push((key, observer));
        Some(key)
    }

    pub(crate) fn remove_observer(&self, key: u64) {
        let removed: Vec<_> = {
            let mut st = self.state.lock();
            let (gone, keep) = std::mem::take(&mut st.observers)
                .into_iter()
                .partition(|(k, _)| *k == key);
            st.observers = keep;
            gone
        };
        drop(removed);
    }

    fn add_child(&self, child: Arc<Self>) -> bool {
        let mut st = self.state.lock();
        if st.exit.is_some() {
            return false;
        }
        st.children.push(child);
        true
    }

    fn remove_child(&self, id: FiberId) {
        self.state.lock().children.retain(|c| c.id != id);
    }

    pub(crate) fn has_children(&self) -> bool {
        !self.state.lock().children.is_empty()
    }

    pub(crate) fn take_children(&self) -> Vec<Arc<Self>> {
        std::mem::take(&mut self.state.lock().children)
    }
}

impl std::fmt::Debug for FiberCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberCell")
            .field("id", &self.id)
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

/// One-shot capability to resume a suspended fiber.
///
/// Cloneable so it can be handed to several completion sources; only the first
/// resumption for the current suspension is accepted.
#[derive(Clone)]
pub(crate) struct RawResume {
    inner: Arc<ResumeInner>,
}

struct ResumeInner {
    fiber: Arc<FiberCell>,
    epoch: u64,
    used: AtomicBool,
}

impl RawResume {
    fn new(fiber: Arc<FiberCell>, epoch: u64) -> Self {
        Self {
            inner: Arc::new(ResumeInner {
                fiber,
                epoch,
                used: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn fiber(&self) -> &Arc<FiberCell> {
        &self.inner.fiber
    }

    /// Continues the fiber with `node`. Returns false if this suspension was
    /// already resumed, interrupted or abandoned.
    pub(crate) fn resume_node(&self, node: NodeRef) -> bool {
        if self.inner.used.swap(true, Ordering::AcqRel) {
            warn!(fiber = %self.inner.fiber.id, "duplicate resume ignored");
            return false;
        }
        self.inner.fiber.resume_with(self.inner.epoch, node)
    }
}

/// Interrupts every fiber in `fibers` on behalf of `by`, then waits for all of
/// them to finish.
pub(crate) fn interrupt_and_await(fibers: Vec<Arc<FiberCell>>, by: FiberId) -> NodeRef {
    if fibers.is_empty() {
        return unit_node();
    }
    async_node(move |resume| {
        for fiber in &fibers {
            fiber.request_interrupt(by);
        }
        await_all(&fibers, resume);
        None
    })
}

/// Waits until every fiber in `fibers` is done, without interrupting them.
pub(crate) fn await_done(fibers: Vec<Arc<FiberCell>>) -> NodeRef {
    if fibers.is_empty() {
        return unit_node();
    }
    async_node(move |resume| {
        await_all(&fibers, resume);
        None
    })
}

fn await_all(fibers: &[Arc<FiberCell>], resume: RawResume) {
    let remaining = Arc::new(AtomicUsize::new(fibers.len()));
    for fiber in fibers {
        let remaining = Arc::clone(&remaining);
        let resume = resume.clone();
        fiber.add_observer(Box::new(move |_| {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                resume.resume_node(unit_node());
            }
        }));
    }
}
