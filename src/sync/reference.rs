//! Atomic reference cell.

use crate::effect::Effect;
use crate::types::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A mutable cell shared between fibers.
///
/// Cloning a `Ref` yields another handle to the same cell.
pub struct Ref<A> {
    cell: Arc<Mutex<A>>,
}

impl<A: Value> Ref<A> {
    /// Creates a cell holding `initial`.
    pub fn new(initial: A) -> Self {
        Self {
            cell: Arc::new(Mutex::new(initial)),
        }
    }

    /// An effect that allocates a fresh cell each time it runs.
    pub fn make<E: Value>(initial: A) -> Effect<Self, E> {
        Effect::sync(move || Self::new(initial.clone()))
    }

    /// Reads the current value.
    pub fn get<E: Value>(&self) -> Effect<A, E> {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || cell.lock().clone())
    }

    /// Replaces the current value.
    pub fn set<E: Value>(&self, value: A) -> Effect<(), E> {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || *cell.lock() = value.clone())
    }

    /// Applies `f` to the current value.
    pub fn update<E: Value>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<(), E> {
        self.modify(move |current| ((), f(current)))
    }

    /// Applies `f` and returns the new value.
    pub fn update_and_get<E: Value>(
        &self,
        f: impl Fn(A) -> A + Send + Sync + 'static,
    ) -> Effect<A, E> {
        self.modify(move |current| {
            let next = f(current);
            (next.clone(), next)
        })
    }

    /// Applies `f` and returns the previous value.
    pub fn get_and_update<E: Value>(
        &self,
        f: impl Fn(A) -> A + Send + Sync + 'static,
    ) -> Effect<A, E> {
        self.modify(move |current| (current.clone(), f(current)))
    }

    /// Atomically computes a result and a replacement from the current value.
    pub fn modify<B: Value, E: Value>(
        &self,
        f: impl Fn(A) -> (B, A) + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || {
            let mut guard = cell.lock();
            let (result, next) = f(guard.clone());
            *guard = next;
            result
        })
    }

    /// Reads the value outside of any effect.
    pub fn get_now(&self) -> A {
        self.cell.lock().clone()
    }
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_lock() {
            Some(value) => f.debug_tuple("Ref").field(&*value).finish(),
            None => f.write_str("Ref(<locked>)"),
        }
    }
}
