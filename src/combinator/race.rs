//! Race: run several effects, first wins.
//!
//! Every candidate runs on its own child fiber. Once a winner is known the
//! losers are interrupted and drained before the race completes:
//!
//! ```text
//! race(a, b):
//!   fa <- fork(a)
//!   fb <- fork(b)
//!   winner <- first exit that settles the race
//!   interrupt(losers)
//!   await(losers)   // losers release their resources first
//!   return winner
//! ```
//!
//! # Algebraic Laws
//!
//! - Identity: `race(a, never) ≃ a`
//! - Associativity: `race(race(a, b), c) ≃ race(a, race(b, c))`
//!
//! # Outcome Semantics
//!
//! [`Effect::race`] settles on the first success and fails only when every
//! candidate failed, with all causes combined in parallel.
//! [`Effect::race_first`] settles on the first exit of any kind.

use crate::effect::node::{
    async_node, die_node, ensuring_node, exit_node, flat_map_node, uninterruptible_node, Node,
    NodeRef, RaceMode,
};
use crate::effect::Effect;
use crate::runtime::fiber_cell::{interrupt_and_await, FiberCell, RawResume};
use crate::runtime::interpreter::FiberView;
use crate::tracing_compat::trace;
use crate::types::{AnyCause, AnyExit, Cause, Exit, FiberId, Never, Value};
use parking_lot::Mutex;
use std::sync::Arc;

impl<A: Value, E: Value> Effect<A, E> {
    /// Runs both effects concurrently; the first success wins.
    pub fn race(self, other: Self) -> Self {
        Self::race_all([self, other])
    }

    /// Runs both effects concurrently; the first to finish wins, whatever its
    /// exit.
    pub fn race_first(self, other: Self) -> Self {
        race_node([self, other], RaceMode::FirstDone)
    }

    /// Runs every effect concurrently; the first success wins.
    ///
    /// An empty list is a defect.
    pub fn race_all(effects: impl IntoIterator<Item = Self>) -> Self {
        race_node(effects, RaceMode::FirstSuccess)
    }

    /// Runs this effect on a daemon fiber and joins it interruptibly.
    ///
    /// Interrupting the caller returns at once; the detached fiber is told to
    /// stop but nobody waits for it.
    pub fn disconnect(self) -> Self {
        self.fork_daemon::<E>().flat_map(|fiber| {
            let detached = fiber.clone();
            fiber.join().on_interrupt(detached.interrupt_fork::<Never>())
        })
    }
}

fn race_node<A: Value, E: Value>(
    effects: impl IntoIterator<Item = Effect<A, E>>,
    mode: RaceMode,
) -> Effect<A, E> {
    Effect::from_node(Arc::new(Node::Race {
        candidates: effects.into_iter().map(Effect::into_node).collect(),
        mode,
    }))
}

struct RaceState {
    settled: bool,
    remaining: usize,
    failures: AnyCause,
    fibers: Vec<Arc<FiberCell>>,
    resume: Option<RawResume>,
}

pub(crate) fn lower(view: &FiberView<'_>, candidates: &[NodeRef], mode: RaceMode) -> NodeRef {
    if candidates.is_empty() {
        return die_node("race requires at least one effect");
    }
    let parent = Arc::clone(view.fiber);
    let parent_id = parent.id();
    let env = view.env.clone();
    let concurrency = view.concurrency;
    let candidates: Vec<NodeRef> = candidates.to_vec();
    let state = Arc::new(Mutex::new(RaceState {
        settled: false,
        remaining: candidates.len(),
        failures: Cause::Empty,
        fibers: Vec::new(),
        resume: None,
    }));
    trace!(fiber = %parent_id, candidates = candidates.len(), ?mode, "starting race");

    let registering = Arc::clone(&state);
    let wait = async_node(move |resume| {
        let fibers: Vec<Arc<FiberCell>> = {
            let mut st = registering.lock();
            st.resume = Some(resume);
            st.fibers = candidates
                .iter()
                .map(|node| parent.fork(Arc::clone(node), env.clone(), concurrency, true))
                .collect();
            st.fibers.clone()
        };
        for fiber in &fibers {
            let state = Arc::clone(&registering);
            let id = fiber.id();
            fiber.add_observer(Box::new(move |exit| on_candidate_exit(&state, id, exit, mode, parent_id)));
        }
        for fiber in fibers {
            fiber.start();
        }
        None
    });

    ensuring_node(wait, move |_| {
        let leftover = {
            let mut st = state.lock();
            st.settled = true;
            st.resume = None;
            std::mem::take(&mut st.fibers)
        };
        interrupt_and_await(leftover, parent_id)
    })
}

fn on_candidate_exit(
    state: &Mutex<RaceState>,
    id: FiberId,
    exit: &AnyExit,
    mode: RaceMode,
    parent: FiberId,
) {
    let settled = {
        let mut st = state.lock();
        if st.settled {
            return;
        }
        st.remaining = st.remaining.saturating_sub(1);
        let winner = match exit {
            Exit::Success(_) => Some(exit.clone()),
            Exit::Failure(_) if mode == RaceMode::FirstDone => Some(exit.clone()),
            Exit::Failure(cause) => {
                let previous = std::mem::replace(&mut st.failures, Cause::Empty);
                st.failures = previous.both(cause.clone());
                (st.remaining == 0)
                    .then(|| Exit::Failure(std::mem::replace(&mut st.failures, Cause::Empty)))
            }
        };
        winner.map(|winner| {
            st.settled = true;
            let losers: Vec<_> = std::mem::take(&mut st.fibers)
                .into_iter()
                .filter(|f| f.id() != id)
                .collect();
            (winner, losers, st.resume.take())
        })
    };
    let Some((winner, losers, Some(resume))) = settled else {
        return;
    };
    trace!(fiber = %parent, winner = %id, losers = losers.len(), "race settled");
    let next = uninterruptible_node(flat_map_node(interrupt_and_await(losers, parent), move |_| {
        exit_node(&winner)
    }));
    resume.resume_node(next);
}
