//! The erased instruction set that effect descriptions are built from.
//!
//! Every typed [`Effect`](super::Effect) wraps an `Arc<Node>`. Nodes are
//! immutable and shared, so an effect value can be run any number of times and
//! cloned freely. Continuations are `Fn` rather than `FnOnce` for the same
//! reason.

use crate::combinator::join::Concurrency;
use crate::context::{Context, ServiceKey};
use crate::runtime::fiber_cell::RawResume;
use crate::runtime::interpreter::FiberView;
use crate::schedule::Schedule;
use crate::types::{erase, unit, AnyCause, AnyExit, AnyValue, Cause, Defect, Exit, ExitKind};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type NodeRef = Arc<Node>;
pub(crate) type Continuation = Arc<dyn Fn(AnyValue) -> NodeRef + Send + Sync>;
pub(crate) type FailureHandler = Arc<dyn Fn(AnyCause) -> NodeRef + Send + Sync>;
pub(crate) type SyncThunk = Arc<dyn Fn() -> Result<AnyValue, AnyCause> + Send + Sync>;
pub(crate) type Register = Arc<dyn Fn(RawResume) -> Option<Canceler> + Send + Sync>;
pub(crate) type Finalizer = Arc<dyn Fn(&AnyExit) -> NodeRef + Send + Sync>;
pub(crate) type Release = Arc<dyn Fn(AnyValue, ExitKind) -> NodeRef + Send + Sync>;
pub(crate) type FiberAccess = Arc<dyn Fn(&FiberView<'_>) -> NodeRef + Send + Sync>;

/// Cancels an in-flight asynchronous operation.
///
/// Returned by the registration callback of
/// [`Effect::async_effect`](super::Effect::async_effect). The runtime invokes it
/// at most once, when the suspended fiber is interrupted.
pub struct Canceler(Box<dyn FnOnce() + Send>);

impl Canceler {
    /// Wraps a cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(cancel))
    }

    pub(crate) fn cancel(self) {
        (self.0)();
    }
}

impl std::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Canceler")
    }
}

/// How the branches of a `Zip` are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ZipMode {
    Sequential,
    Parallel,
}

/// How a race picks its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaceMode {
    /// The first candidate to succeed wins; fails only if all fail.
    FirstSuccess,
    /// The first candidate to finish wins, whatever its exit.
    FirstDone,
}

/// Parameters of a `Retry` node.
pub(crate) struct RetryPolicy {
    pub(crate) source: NodeRef,
    pub(crate) schedule: Schedule,
    pub(crate) predicate: Option<Arc<dyn Fn(&AnyValue) -> bool + Send + Sync>>,
    pub(crate) fallback: Option<Continuation>,
}

pub(crate) enum Node {
    Succeed(AnyValue),
    Fail(AnyCause),
    Sync(SyncThunk),
    Async(Register),
    Suspend(Arc<dyn Fn() -> NodeRef + Send + Sync>),
    FlatMap(NodeRef, Continuation),
    Fold {
        source: NodeRef,
        on_failure: FailureHandler,
        on_success: Continuation,
    },
    Provide(NodeRef, Context),
    Access(ServiceKey),
    Fork {
        source: NodeRef,
        daemon: bool,
    },
    Zip {
        left: NodeRef,
        right: NodeRef,
        mode: ZipMode,
    },
    All {
        effects: Vec<NodeRef>,
        concurrency: Concurrency,
    },
    Race {
        candidates: Vec<NodeRef>,
        mode: RaceMode,
    },
    SetInterruptible {
        source: NodeRef,
        interruptible: bool,
    },
    SetConcurrency {
        source: NodeRef,
        concurrency: Concurrency,
    },
    AcquireRelease {
        acquire: NodeRef,
        release: Release,
    },
    Retry(Arc<RetryPolicy>),
    Ensuring {
        source: NodeRef,
        finalizer: Finalizer,
    },
    Sleep(Duration),
    Yield,
    WithFiber(FiberAccess),
}

impl Node {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Succeed(_) => "Succeed",
            Self::Fail(_) => "Fail",
            Self::Sync(_) => "Sync",
            Self::Async(_) => "Async",
            Self::Suspend(_) => "Suspend",
            Self::FlatMap(..) => "FlatMap",
            Self::Fold { .. } => "Fold",
            Self::Provide(..) => "Provide",
            Self::Access(_) => "Access",
            Self::Fork { .. } => "Fork",
            Self::Zip { .. } => "Zip",
            Self::All { .. } => "All",
            Self::Race { .. } => "Race",
            Self::SetInterruptible { .. } => "SetInterruptible",
            Self::SetConcurrency { .. } => "SetConcurrency",
            Self::AcquireRelease { .. } => "AcquireRelease",
            Self::Retry(_) => "Retry",
            Self::Ensuring { .. } => "Ensuring",
            Self::Sleep(_) => "Sleep",
            Self::Yield => "Yield",
            Self::WithFiber(_) => "WithFiber",
        }
    }
}

pub(crate) fn succeed_node(value: AnyValue) -> NodeRef {
    Arc::new(Node::Succeed(value))
}

pub(crate) fn unit_node() -> NodeRef {
    succeed_node(unit())
}

pub(crate) fn fail_node(cause: AnyCause) -> NodeRef {
    Arc::new(Node::Fail(cause))
}

pub(crate) fn die_node(message: impl Into<String>) -> NodeRef {
    fail_node(Cause::Die(Defect::new(message)))
}

pub(crate) fn exit_node(exit: &AnyExit) -> NodeRef {
    match exit {
        Exit::Success(value) => succeed_node(Arc::clone(value)),
        Exit::Failure(cause) => fail_node(cause.clone()),
    }
}

pub(crate) fn sync_node(
    thunk: impl Fn() -> Result<AnyValue, AnyCause> + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::Sync(Arc::new(thunk)))
}

pub(crate) fn suspend_node(make: impl Fn() -> NodeRef + Send + Sync + 'static) -> NodeRef {
    Arc::new(Node::Suspend(Arc::new(make)))
}

pub(crate) fn flat_map_node(
    source: NodeRef,
    k: impl Fn(AnyValue) -> NodeRef + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::FlatMap(source, Arc::new(k)))
}

pub(crate) fn fold_node(
    source: NodeRef,
    on_failure: impl Fn(AnyCause) -> NodeRef + Send + Sync + 'static,
    on_success: impl Fn(AnyValue) -> NodeRef + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::Fold {
        source,
        on_failure: Arc::new(on_failure),
        on_success: Arc::new(on_success),
    })
}

pub(crate) fn ensuring_node(
    source: NodeRef,
    finalizer: impl Fn(&AnyExit) -> NodeRef + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::Ensuring {
        source,
        finalizer: Arc::new(finalizer),
    })
}

pub(crate) fn with_fiber_node(
    f: impl Fn(&FiberView<'_>) -> NodeRef + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::WithFiber(Arc::new(f)))
}

pub(crate) fn async_node(
    register: impl Fn(RawResume) -> Option<Canceler> + Send + Sync + 'static,
) -> NodeRef {
    Arc::new(Node::Async(Arc::new(register)))
}

pub(crate) fn uninterruptible_node(source: NodeRef) -> NodeRef {
    Arc::new(Node::SetInterruptible {
        source,
        interruptible: false,
    })
}

pub(crate) fn pair_value(left: AnyValue, right: AnyValue) -> AnyValue {
    erase((left, right))
}
