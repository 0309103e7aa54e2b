//! Sequential and collecting composition.

use super::node::{flat_map_node, succeed_node, Node, NodeRef, ZipMode};
use super::Effect;
use crate::combinator::join::Concurrency;
use crate::types::{erase, unerase, AnyValue, Never, Value};
use std::sync::Arc;

impl<A: Value, E: Value> Effect<A, E> {
    /// Transforms the success value.
    pub fn map<B: Value>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B, E> {
        Effect::from_node(flat_map_node(self.node, move |value| {
            succeed_node(erase(f(unerase(value))))
        }))
    }

    /// Runs the effect produced from the success value.
    pub fn flat_map<B: Value>(
        self,
        f: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    ) -> Effect<B, E> {
        Effect::from_node(flat_map_node(self.node, move |value| {
            f(unerase(value)).into_node()
        }))
    }

    /// Replaces the success value with `value`.
    pub fn as_value<B: Value>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Discards the success value.
    pub fn as_unit(self) -> Effect<(), E> {
        self.as_value(())
    }

    /// Runs `next` after this effect, keeping only `next`'s value.
    pub fn and_then<B: Value>(self, next: Effect<B, E>) -> Effect<B, E> {
        self.zip_right(next)
    }

    /// Runs both effects in order and pairs their values.
    pub fn zip<B: Value>(self, other: Effect<B, E>) -> Effect<(A, B), E> {
        zip_node(self, other, ZipMode::Sequential)
    }

    /// Runs both effects concurrently and pairs their values.
    ///
    /// If either fails, the other is interrupted.
    pub fn zip_par<B: Value>(self, other: Effect<B, E>) -> Effect<(A, B), E> {
        zip_node(self, other, ZipMode::Parallel)
    }

    /// Runs both effects in order and combines their values with `f`.
    pub fn zip_with<B: Value, C: Value>(
        self,
        other: Effect<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<C, E> {
        self.zip(other).map(move |(a, b)| f(a, b))
    }

    /// Runs both effects in order, keeping the first value.
    pub fn zip_left<B: Value>(self, other: Effect<B, E>) -> Self {
        let other = other.into_node();
        Self::from_node(flat_map_node(self.node, move |left| {
            flat_map_node(Arc::clone(&other), move |_| succeed_node(Arc::clone(&left)))
        }))
    }

    /// Runs both effects in order, keeping the second value.
    pub fn zip_right<B: Value>(self, other: Effect<B, E>) -> Effect<B, E> {
        let other = other.into_node();
        Effect::from_node(flat_map_node(self.node, move |_| Arc::clone(&other)))
    }

    /// Runs `f` on the success value for its effect, keeping the value.
    pub fn tap<X: Value>(self, f: impl Fn(&A) -> Effect<X, E> + Send + Sync + 'static) -> Self {
        self.flat_map(move |a| {
            let effect = f(&a);
            effect.as_value(a)
        })
    }

    /// Repeats this effect until it fails.
    pub fn forever<B: Value>(self) -> Effect<B, E> {
        Effect::from_node(forever_node(self.node))
    }

    /// Runs every effect in order and collects their values.
    ///
    /// Stops at the first failure.
    pub fn all(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, E> {
        Self::all_with(effects, Concurrency::Sequential)
    }

    /// Runs every effect with the given concurrency and collects their
    /// values in input order.
    ///
    /// With any concurrency other than [`Concurrency::Sequential`], the first
    /// failure interrupts the effects still running.
    pub fn all_with(
        effects: impl IntoIterator<Item = Self>,
        concurrency: Concurrency,
    ) -> Effect<Vec<A>, E> {
        let effects: Vec<_> = effects.into_iter().map(Self::into_node).collect();
        let all = Arc::new(Node::All {
            effects,
            concurrency,
        });
        Effect::from_node(flat_map_node(all, |values| {
            let values: Vec<AnyValue> = unerase(values);
            let typed: Vec<A> = values.into_iter().map(unerase).collect();
            succeed_node(erase(typed))
        }))
    }

    /// Applies `f` to every item in order and collects the values.
    pub fn for_each<T>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Self,
    ) -> Effect<Vec<A>, E> {
        Self::all(items.into_iter().map(f))
    }

    /// Applies `f` to every item with the given concurrency.
    pub fn for_each_with<T>(
        items: impl IntoIterator<Item = T>,
        concurrency: Concurrency,
        f: impl Fn(T) -> Self,
    ) -> Effect<Vec<A>, E> {
        Self::all_with(items.into_iter().map(f), concurrency)
    }
}

impl<A: Value> Effect<A, Never> {
    /// Lets an infallible effect take part in a fallible composition.
    pub fn widen_error<E: Value>(self) -> Effect<A, E> {
        self.retype()
    }
}

fn zip_node<A: Value, B: Value, E: Value>(
    left: Effect<A, E>,
    right: Effect<B, E>,
    mode: ZipMode,
) -> Effect<(A, B), E> {
    let zip = Arc::new(Node::Zip {
        left: left.into_node(),
        right: right.into_node(),
        mode,
    });
    Effect::from_node(flat_map_node(zip, |pair| {
        let (a, b): (AnyValue, AnyValue) = unerase(pair);
        succeed_node(erase((unerase::<A>(a), unerase::<B>(b))))
    }))
}

fn forever_node(source: NodeRef) -> NodeRef {
    let again = Arc::clone(&source);
    flat_map_node(source, move |_| forever_node(Arc::clone(&again)))
}
