//! Combinators that run every effect and accumulate failures instead of
//! stopping at the first one.

use super::Effect;
use crate::types::{Cause, Exit, Never, Value};

impl<A: Value, E: Value> Effect<A, E> {
    /// Runs both effects, even if the first fails, and pairs their values.
    ///
    /// If either fails, the failure holds both causes in order.
    pub fn validate<B: Value>(self, other: Effect<B, E>) -> Effect<(A, B), E> {
        self.exit::<E>()
            .zip(other.exit::<E>())
            .flat_map(|(left, right)| match (left, right) {
                (Exit::Success(a), Exit::Success(b)) => Effect::succeed((a, b)),
                (Exit::Failure(l), Exit::Failure(r)) => Effect::fail_cause(l.then(r)),
                (Exit::Failure(cause), Exit::Success(_))
                | (Exit::Success(_), Exit::Failure(cause)) => Effect::fail_cause(cause),
            })
    }

    /// Runs every effect in order and collects either all values or all
    /// expected errors.
    ///
    /// Defects and interruptions are kept in the cause after the collected
    /// errors.
    pub fn validate_all(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, Vec<E>> {
        Effect::all(effects.into_iter().map(Self::exit::<Never>))
            .widen_error()
            .flat_map(|exits| {
                let (values, errors, rest) = split_exits(exits);
                if errors.is_empty() && rest.is_empty() {
                    Effect::succeed(values)
                } else if errors.is_empty() {
                    Effect::fail_cause(rest)
                } else {
                    Effect::fail_cause(Cause::Fail(errors).then(rest))
                }
            })
    }

    /// Returns the first success, or every expected error if all fail.
    pub fn validate_first(effects: impl IntoIterator<Item = Self>) -> Effect<A, Vec<E>> {
        let effects: Vec<_> = effects.into_iter().collect();
        first_success(effects, 0, Vec::new())
    }

    /// Applies `f` to every item and splits the results into
    /// `(errors, successes)`. Never fails with an expected error.
    pub fn partition<T, E2: Value>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Self,
    ) -> Effect<(Vec<E>, Vec<A>), E2> {
        Effect::all(items.into_iter().map(|item| f(item).either::<Never>()))
            .map(|results| {
                let mut errors = Vec::new();
                let mut values = Vec::new();
                for result in results {
                    match result {
                        Ok(value) => values.push(value),
                        Err(error) => errors.push(error),
                    }
                }
                (errors, values)
            })
            .widen_error()
    }
}

/// Splits exits into values, typed errors and the remaining
/// defects/interruptions (re-typed for the `Vec<E>` error channel).
fn split_exits<A, E: Clone, E2>(exits: Vec<Exit<A, E>>) -> (Vec<A>, Vec<E>, Cause<E2>) {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    let mut rest = Cause::Empty;
    for exit in exits {
        match exit {
            Exit::Success(value) => values.push(value),
            Exit::Failure(cause) => {
                errors.extend(cause.failures().into_iter().cloned());
                rest = rest.then(cause.strip_failures());
            }
        }
    }
    (values, errors, rest)
}

fn first_success<A: Value, E: Value>(
    effects: Vec<Effect<A, E>>,
    index: usize,
    errors: Vec<E>,
) -> Effect<A, Vec<E>> {
    let Some(effect) = effects.get(index).cloned() else {
        return Effect::fail(errors);
    };
    effect.catch_all(move |error| {
        let mut errors = errors.clone();
        errors.push(error);
        first_success(effects.clone(), index + 1, errors)
    })
}
