//! Join: run several effects and wait for all of them.
//!
//! # Semantics
//!
//! `all_with(effects, concurrency)`:
//! 1. Start effects in submission order, at most `concurrency` at a time
//! 2. Store each value at the index of its effect
//! 3. On the first failure, stop starting new effects, interrupt the running
//!    ones and wait for them before failing
//!
//! Failures that happen together are combined with [`Cause::both`]; the
//! interruptions caused by the first failure are not added to it.
//!
//! # Algebraic Laws
//!
//! - Order: results come back in input order whatever the completion order
//! - Identity: `all([])` succeeds immediately with an empty vector
//! - Sequential: `all_with(es, Sequential)` behaves like nested `flat_map`

use crate::context::Context;
use crate::effect::node::{
    async_node, die_node, ensuring_node, fail_node, flat_map_node, pair_value, succeed_node,
    suspend_node, unit_node, NodeRef, ZipMode,
};
use crate::runtime::fiber_cell::{interrupt_and_await, FiberCell, RawResume};
use crate::runtime::interpreter::FiberView;
use crate::tracing_compat::trace;
use crate::types::{erase, unerase, AnyCause, AnyExit, AnyValue, Cause, Exit};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// How many effects of a collection run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Concurrency {
    /// One after another, stopping at the first failure.
    #[default]
    Sequential,
    /// All at once.
    Unbounded,
    /// At most `n` at once; `Bounded(0)` behaves like `Bounded(1)`.
    Bounded(usize),
    /// Whatever the enclosing region uses (see
    /// [`Effect::with_concurrency`](crate::Effect::with_concurrency)).
    Inherit,
}

impl Concurrency {
    /// Resolves `Inherit` against the ambient setting.
    pub(crate) const fn resolve(self, ambient: Self) -> Self {
        match (self, ambient) {
            (Self::Inherit, Self::Inherit) => Self::Unbounded,
            (Self::Inherit, ambient) => ambient,
            (own, _) => own,
        }
    }
}

pub(crate) fn lower_zip(view: &FiberView<'_>, left: &NodeRef, right: &NodeRef, mode: ZipMode) -> NodeRef {
    match mode {
        ZipMode::Sequential => {
            let right = Arc::clone(right);
            flat_map_node(Arc::clone(left), move |a| {
                flat_map_node(Arc::clone(&right), move |b| {
                    succeed_node(pair_value(Arc::clone(&a), b))
                })
            })
        }
        ZipMode::Parallel => {
            let both = [Arc::clone(left), Arc::clone(right)];
            flat_map_node(lower_all(view, &both, Concurrency::Unbounded), |values| {
                let mut values: Vec<AnyValue> = unerase(values);
                let b = values.pop();
                let a = values.pop();
                match (a, b) {
                    (Some(a), Some(b)) => succeed_node(pair_value(a, b)),
                    _ => die_node("parallel zip lost a branch result"),
                }
            })
        }
    }
}

/// Lowers an `All` node. The result is an erased `Vec<AnyValue>`.
pub(crate) fn lower_all(view: &FiberView<'_>, effects: &[NodeRef], concurrency: Concurrency) -> NodeRef {
    let effects: Arc<[NodeRef]> = effects.into();
    if effects.is_empty() {
        return succeed_node(erase(Vec::<AnyValue>::new()));
    }
    let limit = match concurrency.resolve(view.concurrency) {
        Concurrency::Sequential => return sequential_all(effects),
        Concurrency::Bounded(n) => n.max(1),
        Concurrency::Unbounded | Concurrency::Inherit => effects.len(),
    };
    let child_concurrency = match concurrency {
        Concurrency::Bounded(n) => Concurrency::Bounded(n.max(1)),
        _ => view.concurrency,
    };
    let coordinator = Arc::new(Coordinator {
        parent: Arc::clone(view.fiber),
        env: view.env.clone(),
        effects: Arc::clone(&effects),
        limit,
        child_concurrency,
        state: Mutex::new(CoordinatorState {
            results: vec![None; effects.len()],
            pending: (0..effects.len()).collect(),
            running: Vec::new(),
            failure: Cause::Empty,
            failed: false,
            resume: None,
        }),
    });
    trace!(fiber = %view.id(), effects = effects.len(), limit, "starting parallel collection");
    let registering = Arc::clone(&coordinator);
    let wait = async_node(move |resume| {
        registering.state.lock().resume = Some(resume);
        Coordinator::launch(&registering);
        None
    });
    ensuring_node(wait, move |exit: &AnyExit| match exit {
        Exit::Success(_) => unit_node(),
        Exit::Failure(_) => {
            let running = coordinator.cancel();
            interrupt_and_await(running, coordinator.parent.id())
        }
    })
}

fn sequential_all(effects: Arc<[NodeRef]>) -> NodeRef {
    suspend_node(move || {
        let collected = Arc::new(Mutex::new(Vec::with_capacity(effects.len())));
        sequential_step(Arc::clone(&effects), 0, collected)
    })
}

fn sequential_step(effects: Arc<[NodeRef]>, index: usize, collected: Arc<Mutex<Vec<AnyValue>>>) -> NodeRef {
    let Some(effect) = effects.get(index).cloned() else {
        return succeed_node(erase(std::mem::take(&mut *collected.lock())));
    };
    flat_map_node(effect, move |value| {
        collected.lock().push(value);
        sequential_step(Arc::clone(&effects), index + 1, Arc::clone(&collected))
    })
}

struct CoordinatorState {
    results: Vec<Option<AnyValue>>,
    pending: VecDeque<usize>,
    running: Vec<(usize, Arc<FiberCell>)>,
    failure: AnyCause,
    failed: bool,
    resume: Option<RawResume>,
}

/// Tracks the children of one parallel collection.
struct Coordinator {
    parent: Arc<FiberCell>,
    env: Context,
    effects: Arc<[NodeRef]>,
    limit: usize,
    child_concurrency: Concurrency,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    /// Starts queued effects while slots are free.
    fn launch(this: &Arc<Self>) {
        let started: Vec<(usize, Arc<FiberCell>)> = {
            let mut st = this.state.lock();
            let mut started = Vec::new();
            while !st.failed && st.running.len() < this.limit {
                let Some(index) = st.pending.pop_front() else {
                    break;
                };
                let child = this.parent.fork(
                    Arc::clone(&this.effects[index]),
                    this.env.clone(),
                    this.child_concurrency,
                    true,
                );
                st.running.push((index, Arc::clone(&child)));
                started.push((index, child));
            }
            started
        };
        for (index, child) in &started {
            let coordinator = Arc::clone(this);
            let index = *index;
            child.add_observer(Box::new(move |exit| Self::on_child_exit(&coordinator, index, exit)));
        }
        for (_, child) in started {
            child.start();
        }
    }

    fn on_child_exit(this: &Arc<Self>, index: usize, exit: &AnyExit) {
        let (to_interrupt, finished) = {
            let mut st = this.state.lock();
            st.running.retain(|(i, _)| *i != index);
            let mut to_interrupt = Vec::new();
            match exit {
                Exit::Success(value) => st.results[index] = Some(Arc::clone(value)),
                Exit::Failure(cause) if !st.failed => {
                    st.failed = true;
                    st.failure = cause.clone();
                    st.pending.clear();
                    to_interrupt = st.running.iter().map(|(_, c)| Arc::clone(c)).collect();
                }
                Exit::Failure(cause) if !cause.is_interrupted_only() => {
                    let previous = std::mem::replace(&mut st.failure, Cause::Empty);
                    st.failure = previous.both(cause.clone());
                }
                Exit::Failure(_) => {}
            }
            let done = st.running.is_empty() && (st.failed || st.pending.is_empty());
            let finished = if done {
                st.resume.take().map(|resume| {
                    let node = if st.failed {
                        fail_node(std::mem::replace(&mut st.failure, Cause::Empty))
                    } else {
                        let values: Vec<AnyValue> =
                            st.results.iter_mut().filter_map(Option::take).collect();
                        succeed_node(erase(values))
                    };
                    (resume, node)
                })
            } else {
                None
            };
            (to_interrupt, finished)
        };
        let parent = this.parent.id();
        for child in to_interrupt {
            child.request_interrupt(parent);
        }
        match finished {
            Some((resume, node)) => {
                resume.resume_node(node);
            }
            None => Self::launch(this),
        }
    }

    /// Stops the collection after the parent gave up on it and returns the
    /// children still running.
    fn cancel(&self) -> Vec<Arc<FiberCell>> {
        let mut st = self.state.lock();
        st.failed = true;
        st.pending.clear();
        st.resume = None;
        st.running.iter().map(|(_, c)| Arc::clone(c)).collect()
    }
}
