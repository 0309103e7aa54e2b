//! Retry and repeat driven by a [`Schedule`].
//!
//! # Semantics
//!
//! - Only expected failures are retried. Defects and interruptions propagate
//!   at once.
//! - Attempt `n + 1` starts after `schedule.delay(n)`. When the schedule
//!   stops, the last failure propagates, or the fallback runs.
//! - The delay is a plain sleep, so a fiber interrupted between attempts
//!   stops without starting another one.
//!
//! `retry(Schedule::recurs(3))` therefore runs the effect at most 4 times.

use crate::effect::node::{
    fail_node, flat_map_node, fold_node, succeed_node, Continuation, Node, NodeRef, RetryPolicy,
};
use crate::effect::Effect;
use crate::schedule::Schedule;
use crate::tracing_compat::debug;
use crate::types::{unerase, AnyCause, AnyValue, ExitKind, Value};
use std::sync::Arc;

impl<A: Value, E: Value> Effect<A, E> {
    /// Re-runs this effect after expected failures, as long as `schedule`
    /// allows.
    pub fn retry(self, schedule: Schedule) -> Self {
        retry_node(self, schedule, None, None)
    }

    /// Like [`retry`](Self::retry), but failures not matching `predicate`
    /// propagate immediately without using up the schedule.
    pub fn retry_while(
        self,
        schedule: Schedule,
        predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        let predicate: Arc<dyn Fn(&AnyValue) -> bool + Send + Sync> =
            Arc::new(move |error: &AnyValue| {
                let error: E = unerase(Arc::clone(error));
                predicate(&error)
            });
        retry_node(self, schedule, Some(predicate), None)
    }

    /// Like [`retry`](Self::retry), but runs `fallback` with the last error
    /// once the schedule is exhausted.
    pub fn retry_or_else(
        self,
        schedule: Schedule,
        fallback: impl Fn(E) -> Self + Send + Sync + 'static,
    ) -> Self {
        let fallback: Continuation =
            Arc::new(move |error: AnyValue| fallback(unerase(error)).into_node());
        retry_node(self, schedule, None, Some(fallback))
    }

    /// Re-runs this effect after each success, as long as `schedule` allows.
    /// Returns the last value; a failure stops the repetition.
    pub fn repeat(self, schedule: Schedule) -> Self {
        let source = self.into_node();
        Self::from_node(repeat_from(source, schedule, 0))
    }
}

fn retry_node<A: Value, E: Value>(
    effect: Effect<A, E>,
    schedule: Schedule,
    predicate: Option<Arc<dyn Fn(&AnyValue) -> bool + Send + Sync>>,
    fallback: Option<Continuation>,
) -> Effect<A, E> {
    Effect::from_node(Arc::new(Node::Retry(Arc::new(RetryPolicy {
        source: effect.into_node(),
        schedule,
        predicate,
        fallback,
    }))))
}

pub(crate) fn lower(policy: &Arc<RetryPolicy>) -> NodeRef {
    attempt(Arc::clone(policy), 0)
}

fn attempt(policy: Arc<RetryPolicy>, retries: u32) -> NodeRef {
    let source = Arc::clone(&policy.source);
    fold_node(
        source,
        move |cause| after_failure(&policy, retries, cause),
        succeed_node,
    )
}

fn after_failure(policy: &Arc<RetryPolicy>, retries: u32, cause: AnyCause) -> NodeRef {
    if cause.kind() != ExitKind::Fail {
        return fail_node(cause);
    }
    let Some(error) = cause.first_failure().map(Arc::clone) else {
        return fail_node(cause);
    };
    if let Some(predicate) = &policy.predicate {
        if !predicate(&error) {
            debug!(retries, "failure does not match retry predicate");
            return fail_node(cause);
        }
    }
    match policy.schedule.delay(retries) {
        Some(delay) => {
            debug!(attempt = retries + 2, ?delay, schedule = %policy.schedule, "retrying after failure");
            let next = Arc::clone(policy);
            flat_map_node(Arc::new(Node::Sleep(delay)), move |_| {
                attempt(Arc::clone(&next), retries + 1)
            })
        }
        None => {
            debug!(retries, schedule = %policy.schedule, "retry schedule exhausted");
            match &policy.fallback {
                Some(fallback) => fallback(error),
                None => fail_node(cause),
            }
        }
    }
}

fn repeat_from(source: NodeRef, schedule: Schedule, repeats: u32) -> NodeRef {
    let again = Arc::clone(&source);
    flat_map_node(source, move |value| match schedule.delay(repeats) {
        Some(delay) => {
            let again = Arc::clone(&again);
            let schedule = schedule.clone();
            flat_map_node(Arc::new(Node::Sleep(delay)), move |_| {
                repeat_from(Arc::clone(&again), schedule.clone(), repeats + 1)
            })
        }
        None => succeed_node(value),
    })
}
