//! Recovering from, transforming and inspecting failures.
//!
//! Handlers here see expected failures only, unless their name says `cause`.
//! A cause without a typed failure (a pure defect or interruption) passes
//! through untouched. Handlers never run on a fiber that is being interrupted.

use super::node::{fail_node, flat_map_node, fold_node, succeed_node};
use super::Effect;
use crate::types::{erase, unerase, AnyCause, AnyValue, Cause, Defect, Exit, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Errors that carry a discriminating tag, for [`Effect::catch_tag`].
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// enum AppError { NotFound(String), Timeout }
///
/// impl Tagged for AppError {
///     fn tag(&self) -> &'static str {
///         match self {
///             Self::NotFound(_) => "NotFound",
///             Self::Timeout => "Timeout",
///         }
///     }
/// }
/// ```
pub trait Tagged {
    /// The tag of this error value.
    fn tag(&self) -> &'static str;
}

type TagHandler<A, E> = Arc<dyn Fn(E) -> Effect<A, E> + Send + Sync>;

/// A set of per-tag handlers for [`Effect::catch_tags`].
pub struct TagHandlers<A, E> {
    handlers: HashMap<&'static str, TagHandler<A, E>>,
}

impl<A: Value, E: Value + Tagged> TagHandlers<A, E> {
    /// An empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Handles errors tagged `tag` with `handler`. A later handler for the
    /// same tag replaces the earlier one.
    #[must_use]
    pub fn on(
        mut self,
        tag: &'static str,
        handler: impl Fn(E) -> Effect<A, E> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(tag, Arc::new(handler));
        self
    }

    /// The tags with a handler.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl<A: Value, E: Value + Tagged> Default for TagHandlers<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, E> fmt::Debug for TagHandlers<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl<A: Value, E: Value> Effect<A, E> {
    /// Recovers from an expected failure.
    pub fn catch_all<E2: Value>(
        self,
        handler: impl Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        Effect::from_node(fold_node(
            self.node,
            move |cause| match cause.failure_or_cause() {
                Ok(error) => handler(unerase(error)).into_node(),
                Err(cause) => fail_node(cause),
            },
            succeed_node,
        ))
    }

    /// Recovers from any failure, including defects, given its full cause.
    pub fn catch_all_cause<E2: Value>(
        self,
        handler: impl Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        Effect::from_node(fold_node(
            self.node,
            move |cause| handler(typed_cause(cause)).into_node(),
            succeed_node,
        ))
    }

    /// Recovers from expected failures whose tag is `tag`; others pass through.
    pub fn catch_tag(
        self,
        tag: &'static str,
        handler: impl Fn(E) -> Self + Send + Sync + 'static,
    ) -> Self
    where
        E: Tagged,
    {
        self.catch_if(move |e| e.tag() == tag, handler)
    }

    /// Recovers from expected failures with a handler chosen by tag.
    pub fn catch_tags(self, handlers: TagHandlers<A, E>) -> Self
    where
        E: Tagged,
    {
        let handlers = handlers.handlers;
        self.catch_all(move |error: E| match handlers.get(error.tag()) {
            Some(handler) => handler(error),
            None => Self::fail(error),
        })
    }

    /// Recovers from expected failures satisfying `predicate`.
    pub fn catch_if(
        self,
        predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
        handler: impl Fn(E) -> Self + Send + Sync + 'static,
    ) -> Self {
        self.catch_all(move |error| {
            if predicate(&error) {
                handler(error)
            } else {
                Self::fail(error)
            }
        })
    }

    /// Runs `that` if this effect fails with an expected error.
    pub fn or_else<E2: Value>(self, that: Effect<A, E2>) -> Effect<A, E2> {
        self.catch_all(move |_| that.clone())
    }

    /// Replaces any expected failure with `make()`.
    pub fn or_else_fail<E2: Value>(
        self,
        make: impl Fn() -> E2 + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.catch_all(move |_| Effect::fail(make()))
    }

    /// Replaces any expected failure with the value `make()`.
    pub fn or_else_succeed<E2: Value>(
        self,
        make: impl Fn() -> A + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.catch_all(move |_| Effect::succeed(make()))
    }

    /// Transforms every expected error.
    pub fn map_error<E2: Value>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Effect<A, E2> {
        Effect::from_node(fold_node(
            self.node,
            move |cause| fail_node(cause.map(|e| erase(f(unerase(e))))),
            succeed_node,
        ))
    }

    /// Transforms both the error and the success value.
    pub fn map_both<B: Value, E2: Value>(
        self,
        on_error: impl Fn(E) -> E2 + Send + Sync + 'static,
        on_success: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        self.map_error(on_error).map(on_success)
    }

    /// Handles both outcomes with pure functions.
    pub fn fold<B: Value, E2: Value>(
        self,
        on_failure: impl Fn(E) -> B + Send + Sync + 'static,
        on_success: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        self.fold_effect(
            move |e| Effect::succeed(on_failure(e)),
            move |a| Effect::succeed(on_success(a)),
        )
    }

    /// Handles both outcomes with effectful functions.
    pub fn fold_effect<B: Value, E2: Value>(
        self,
        on_failure: impl Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        Effect::from_node(fold_node(
            self.node,
            move |cause| match cause.failure_or_cause() {
                Ok(error) => on_failure(unerase(error)).into_node(),
                Err(cause) => fail_node(cause),
            },
            move |value| on_success(unerase(value)).into_node(),
        ))
    }

    /// Handles both outcomes, seeing the full cause on failure.
    pub fn fold_cause_effect<B: Value, E2: Value>(
        self,
        on_failure: impl Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        Effect::from_node(fold_node(
            self.node,
            move |cause| on_failure(typed_cause(cause)).into_node(),
            move |value| on_success(unerase(value)).into_node(),
        ))
    }

    /// Tries each effect in order until one succeeds.
    ///
    /// Fails with the last expected error if all fail. An empty list is a
    /// defect.
    pub fn first_success_of(effects: impl IntoIterator<Item = Self>) -> Self {
        let mut effects = effects.into_iter().collect::<Vec<_>>().into_iter().rev();
        let Some(last) = effects.next() else {
            return Self::die("first_success_of called with no effects");
        };
        effects.fold(last, |rest, effect| effect.or_else(rest))
    }

    /// Discards both the value and any expected failure.
    pub fn ignore<E2: Value>(self) -> Effect<(), E2> {
        self.fold(|_| (), |_| ())
    }

    /// Runs `f` on an expected failure, then fails with the original cause.
    pub fn tap_error<X: Value>(
        self,
        f: impl Fn(&E) -> Effect<X, E> + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(fold_node(
            self.node,
            move |cause| match cause.first_failure().map(Arc::clone) {
                Some(error) => {
                    let error: E = unerase(error);
                    flat_map_node(f(&error).into_node(), move |_| fail_node(cause.clone()))
                }
                None => fail_node(cause),
            },
            succeed_node,
        ))
    }

    /// Runs one of two effects for their side effects, keeping the outcome.
    pub fn tap_both<X: Value, Y: Value>(
        self,
        on_failure: impl Fn(&E) -> Effect<X, E> + Send + Sync + 'static,
        on_success: impl Fn(&A) -> Effect<Y, E> + Send + Sync + 'static,
    ) -> Self {
        self.tap_error(on_failure).tap(on_success)
    }

    /// Moves the expected error into the success channel.
    pub fn either<E2: Value>(self) -> Effect<Result<A, E>, E2> {
        self.fold(Err, Ok)
    }

    /// `Some` on success, `None` on expected failure.
    pub fn option<E2: Value>(self) -> Effect<Option<A>, E2> {
        self.fold(|_| None, Some)
    }

    /// Captures the complete outcome, including defects, as a value.
    pub fn exit<E2: Value>(self) -> Effect<Exit<A, E>, E2> {
        self.fold_cause_effect(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |value| Effect::succeed(Exit::Success(value)),
        )
    }

    /// Exposes the full cause in the error channel.
    pub fn sandbox(self) -> Effect<A, Cause<E>> {
        Effect::from_node(fold_node(
            self.node,
            |cause| fail_node(Cause::Fail(erase(typed_cause::<E>(cause)))),
            succeed_node,
        ))
    }

    /// Turns expected failures into defects.
    pub fn or_die<E2: Value>(self) -> Effect<A, E2>
    where
        E: fmt::Debug,
    {
        Effect::from_node(fold_node(
            self.node,
            |cause| fail_node(failures_to_defects::<E>(&cause)),
            succeed_node,
        ))
    }
}

impl<A: Value, E: Value> Effect<A, Cause<E>> {
    /// Reverses [`sandbox`](Effect::sandbox).
    pub fn unsandbox(self) -> Effect<A, E> {
        Effect::from_node(fold_node(
            self.node,
            |cause| fail_node(flatten_sandboxed::<E>(cause)),
            succeed_node,
        ))
    }
}

pub(crate) fn typed_cause<E: Value>(cause: AnyCause) -> Cause<E> {
    cause.map(unerase)
}

fn failures_to_defects<E: Value + fmt::Debug>(cause: &AnyCause) -> AnyCause {
    cause.fold(
        &|| Cause::Empty,
        &|e: &AnyValue| {
            let error: E = unerase(Arc::clone(e));
            Cause::Die(Defect::new(format!("{error:?}")))
        },
        &|d: &Defect| Cause::Die(d.clone()),
        &Cause::Interrupt,
        &Cause::then,
        &Cause::both,
    )
}

fn flatten_sandboxed<E: Value>(cause: AnyCause) -> AnyCause {
    match cause {
        Cause::Fail(inner) => unerase::<Cause<E>>(inner).map(erase),
        Cause::Sequential(l, r) => flatten_sandboxed::<E>(*l).then(flatten_sandboxed::<E>(*r)),
        Cause::Parallel(l, r) => flatten_sandboxed::<E>(*l).both(flatten_sandboxed::<E>(*r)),
        other => other,
    }
}
