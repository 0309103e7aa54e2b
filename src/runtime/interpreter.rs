//! The run loop that evaluates effect nodes on a fiber.
//!
//! Evaluation is an explicit state machine: `current` is either a node to
//! evaluate or an exit to propagate, and `stack` holds the continuations still
//! waiting for a result. Nothing recurses on the native stack, so arbitrarily
//! long `flat_map` chains and loops run in constant stack space.
//!
//! Interruption is checked before every step while the fiber is interruptible.
//! When it is observed, attached children are interrupted and awaited before
//! any frame unwinds. After that, failure handlers are skipped and only
//! finalizers (which always run uninterruptibly) execute.

use crate::combinator::join::Concurrency;
use crate::combinator::{bracket, join, race, retry};
use crate::context::Context;
use crate::effect::node::{
    unit_node, Canceler, Continuation, FailureHandler, Finalizer, Node, NodeRef, Register,
};
use crate::error::ServiceNotFound;
use crate::runtime::fiber_cell::{interrupt_and_await, FiberCell, RawResume};
use crate::tracing_compat::trace;
use crate::types::{erase, unit, AnyCause, AnyExit, Cause, Defect, Exit, FiberId};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the fiber is doing on its next step.
pub(crate) enum Step {
    Eval(NodeRef),
    Done(AnyExit),
    /// Placeholder while a step is being taken.
    Idle,
}

/// Outcome of a single step, consumed by [`FiberCell::run_turn`].
pub(crate) enum Next {
    Continue,
    Yield,
    Suspend(Register),
    Finished(AnyExit),
}

enum Frame {
    FlatMap(Continuation),
    Fold {
        on_failure: FailureHandler,
        on_success: Continuation,
    },
    RestoreEnv(Context),
    RestoreInterruptible(bool),
    RestoreConcurrency(Concurrency),
    Ensuring(Finalizer),
    /// A finalizer is running on behalf of `exit`.
    Finalized {
        exit: AnyExit,
        interruptible: bool,
    },
    /// Children are being reaped before `exit` is published.
    RestoreExit(AnyExit),
}

pub(crate) struct RunState {
    pub(crate) current: Step,
    stack: Vec<Frame>,
    env: Context,
    pub(crate) interruptible: bool,
    concurrency: Concurrency,
    children_reaped: bool,
}

impl RunState {
    pub(crate) fn new(node: NodeRef, env: Context, concurrency: Concurrency) -> Self {
        Self {
            current: Step::Eval(node),
            stack: Vec::new(),
            env,
            interruptible: true,
            concurrency,
            children_reaped: false,
        }
    }

    fn view<'a>(&'a self, fiber: &'a Arc<FiberCell>) -> FiberView<'a> {
        FiberView {
            fiber,
            env: &self.env,
            interruptible: self.interruptible,
            concurrency: self.concurrency,
        }
    }
}

/// Read-only access to the running fiber, handed to `WithFiber` nodes.
pub(crate) struct FiberView<'a> {
    pub(crate) fiber: &'a Arc<FiberCell>,
    pub(crate) env: &'a Context,
    pub(crate) interruptible: bool,
    pub(crate) concurrency: Concurrency,
}

impl FiberView<'_> {
    pub(crate) fn id(&self) -> FiberId {
        self.fiber.id()
    }
}

/// Takes one step of evaluation.
pub(crate) fn step(fiber: &Arc<FiberCell>, run: &mut RunState) -> Next {
    if run.interruptible && fiber.is_interrupted() {
        let exit = interrupted_exit(fiber, std::mem::replace(&mut run.current, Step::Idle));
        if fiber.has_children() {
            // Children go first so they never outlive resources the unwinding
            // frames are about to release.
            reap_children(fiber, run, exit, true);
        } else {
            run.current = Step::Done(exit);
        }
    }
    match std::mem::replace(&mut run.current, Step::Idle) {
        Step::Eval(node) => eval(fiber, run, &node),
        Step::Done(exit) => unwind(fiber, run, exit),
        Step::Idle => Next::Finished(Exit::Failure(Cause::Die(
            Defect::new("fiber stepped without a pending instruction").with_fiber(fiber.id()),
        ))),
    }
}

fn interrupted_exit(fiber: &Arc<FiberCell>, current: Step) -> AnyExit {
    match current {
        Step::Done(Exit::Failure(cause)) if cause.is_interrupted() => Exit::Failure(cause),
        Step::Done(Exit::Failure(cause)) => {
            Exit::Failure(cause.then(Cause::Interrupt(fiber.interruptor())))
        }
        _ => {
            trace!(fiber = %fiber.id(), "interruption observed");
            Exit::Failure(Cause::Interrupt(fiber.interruptor()))
        }
    }
}

/// Interrupts and awaits every attached child, then resumes with `exit`.
///
/// With `resume_unwinding` the interruptible flag is restored afterwards so the
/// remaining frames unwind as usual; otherwise the fiber stays masked until it
/// publishes its exit.
fn reap_children(
    fiber: &Arc<FiberCell>,
    run: &mut RunState,
    exit: AnyExit,
    resume_unwinding: bool,
) {
    let id = fiber.id();
    let children = fiber.take_children();
    trace!(fiber = %id, children = children.len(), "reaping children");
    if resume_unwinding {
        run.stack.push(Frame::RestoreInterruptible(run.interruptible));
    }
    run.stack.push(Frame::RestoreExit(exit));
    run.interruptible = false;
    run.current = Step::Eval(interrupt_and_await(children, id));
}

fn eval(fiber: &Arc<FiberCell>, run: &mut RunState, node: &NodeRef) -> Next {
    let id = fiber.id();
    match &**node {
        Node::Succeed(value) => run.current = Step::Done(Exit::Success(Arc::clone(value))),
        Node::Fail(cause) => run.current = Step::Done(Exit::Failure(attribute(cause.clone(), id))),
        Node::Sync(thunk) => {
            run.current = Step::Done(match catch_unwind(AssertUnwindSafe(|| thunk())) {
                Ok(Ok(value)) => Exit::Success(value),
                Ok(Err(cause)) => Exit::Failure(attribute(cause, id)),
                Err(payload) => died(payload, id),
            });
        }
        Node::Async(register) => return Next::Suspend(Arc::clone(register)),
        Node::Suspend(make) => run.current = guarded(id, || make()),
        Node::FlatMap(source, k) => {
            run.stack.push(Frame::FlatMap(Arc::clone(k)));
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::Fold {
            source,
            on_failure,
            on_success,
        } => {
            run.stack.push(Frame::Fold {
                on_failure: Arc::clone(on_failure),
                on_success: Arc::clone(on_success),
            });
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::Provide(source, context) => {
            let merged = run.env.clone().merge(context);
            let previous = std::mem::replace(&mut run.env, merged);
            run.stack.push(Frame::RestoreEnv(previous));
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::Access(key) => {
            run.current = Step::Done(match run.env.get_raw(key) {
                Some(service) => Exit::Success(service),
                None => Exit::Failure(Cause::Die(
                    Defect::new(ServiceNotFound { tag: key.name() }.to_string()).with_fiber(id),
                )),
            });
        }
        Node::Fork { source, daemon } => {
            let child = fiber.fork(Arc::clone(source), run.env.clone(), run.concurrency, !daemon);
            child.start();
            run.current = Step::Done(Exit::Success(erase(child)));
        }
        Node::Zip { left, right, mode } => {
            let next = {
                let view = run.view(fiber);
                guarded(id, || join::lower_zip(&view, left, right, *mode))
            };
            run.current = next;
        }
        Node::All {
            effects,
            concurrency,
        } => {
            let next = {
                let view = run.view(fiber);
                guarded(id, || join::lower_all(&view, effects, *concurrency))
            };
            run.current = next;
        }
        Node::Race { candidates, mode } => {
            let next = {
                let view = run.view(fiber);
                guarded(id, || race::lower(&view, candidates, *mode))
            };
            run.current = next;
        }
        Node::SetInterruptible {
            source,
            interruptible,
        } => {
            run.stack
                .push(Frame::RestoreInterruptible(run.interruptible));
            run.interruptible = *interruptible;
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::SetConcurrency {
            source,
            concurrency,
        } => {
            run.stack.push(Frame::RestoreConcurrency(run.concurrency));
            run.concurrency = *concurrency;
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::AcquireRelease { acquire, release } => {
            run.current = Step::Eval(bracket::lower_acquire_release(acquire, release));
        }
        Node::Retry(policy) => run.current = Step::Eval(retry::lower(policy)),
        Node::Ensuring { source, finalizer } => {
            run.stack.push(Frame::Ensuring(Arc::clone(finalizer)));
            run.current = Step::Eval(Arc::clone(source));
        }
        Node::Sleep(duration) => {
            if duration.is_zero() {
                run.current = Step::Done(Exit::Success(unit()));
                return Next::Yield;
            }
            return Next::Suspend(sleep_register(*duration));
        }
        Node::Yield => {
            run.current = Step::Done(Exit::Success(unit()));
            return Next::Yield;
        }
        Node::WithFiber(access) => {
            let next = {
                let view = run.view(fiber);
                guarded(id, || access(&view))
            };
            run.current = next;
        }
    }
    Next::Continue
}

fn unwind(fiber: &Arc<FiberCell>, run: &mut RunState, exit: AnyExit) -> Next {
    let id = fiber.id();
    let Some(frame) = run.stack.pop() else {
        if !run.children_reaped && fiber.has_children() {
            run.children_reaped = true;
            reap_children(fiber, run, exit, false);
            return Next::Continue;
        }
        return Next::Finished(exit);
    };
    run.current = match (frame, exit) {
        (Frame::FlatMap(k), Exit::Success(value)) => guarded(id, || k(value)),
        (Frame::FlatMap(_), failure) => Step::Done(failure),
        (Frame::Fold { on_success, .. }, Exit::Success(value)) => {
            guarded(id, || on_success(value))
        }
        (Frame::Fold { on_failure, .. }, Exit::Failure(cause)) => {
            if run.interruptible && fiber.is_interrupted() {
                Step::Done(Exit::Failure(cause))
            } else {
                guarded(id, || on_failure(cause))
            }
        }
        (Frame::RestoreEnv(env), exit) => {
            run.env = env;
            Step::Done(exit)
        }
        (Frame::RestoreInterruptible(flag), exit) => {
            run.interruptible = flag;
            Step::Done(exit)
        }
        (Frame::RestoreConcurrency(concurrency), exit) => {
            run.concurrency = concurrency;
            Step::Done(exit)
        }
        (Frame::Ensuring(finalizer), exit) => {
            let next = guarded(id, || finalizer(&exit));
            run.stack.push(Frame::Finalized {
                exit,
                interruptible: run.interruptible,
            });
            run.interruptible = false;
            next
        }
        (
            Frame::Finalized {
                exit: original,
                interruptible,
            },
            finalizer_exit,
        ) => {
            run.interruptible = interruptible;
            Step::Done(match (original, finalizer_exit) {
                (original, Exit::Success(_)) => original,
                (Exit::Success(_), Exit::Failure(cause)) => Exit::Failure(cause),
                (Exit::Failure(first), Exit::Failure(second)) => {
                    Exit::Failure(first.then(second))
                }
            })
        }
        (Frame::RestoreExit(original), _) => Step::Done(original),
    };
    Next::Continue
}

/// Evaluates a node-producing closure, turning a panic into a defect.
fn guarded(fiber: FiberId, make: impl FnOnce() -> NodeRef) -> Step {
    match catch_unwind(AssertUnwindSafe(make)) {
        Ok(node) => Step::Eval(node),
        Err(payload) => Step::Done(died(payload, fiber)),
    }
}

fn died(payload: Box<dyn Any + Send>, fiber: FiberId) -> AnyExit {
    Exit::Failure(Cause::Die(Defect::from_panic(payload).with_fiber(fiber)))
}

/// Records the raising fiber on defects that do not name one yet.
fn attribute(cause: AnyCause, fiber: FiberId) -> AnyCause {
    match cause {
        Cause::Die(defect) => Cause::Die(defect.with_fiber(fiber)),
        Cause::Sequential(l, r) => Cause::Sequential(
            Box::new(attribute(*l, fiber)),
            Box::new(attribute(*r, fiber)),
        ),
        Cause::Parallel(l, r) => Cause::Parallel(
            Box::new(attribute(*l, fiber)),
            Box::new(attribute(*r, fiber)),
        ),
        other => other,
    }
}

fn sleep_register(duration: Duration) -> Register {
    Arc::new(move |resume: RawResume| {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            // Too far in the future to ever fire.
            return None;
        };
        let runtime = Arc::clone(resume.fiber().runtime());
        let waker = resume.clone();
        let timer_id = runtime.timer.register(
            deadline,
            Box::new(move || {
                waker.resume_node(unit_node());
            }),
        );
        Some(Canceler::new(move || {
            runtime.timer.cancel(timer_id);
        }))
    })
}
