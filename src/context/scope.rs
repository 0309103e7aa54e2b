//! Scopes collect finalizers and run them when closed.
//!
//! A [`Scope`] is itself a service: [`Effect::scoped`](crate::Effect::scoped)
//! provides a fresh one to its body, and every
//! [`acquire_release`](crate::Effect::acquire_release) inside registers its
//! release there. Closing runs the finalizers in reverse registration order,
//! exactly once, uninterruptibly.

use super::Tag;
use crate::effect::node::{fail_node, fold_node, suspend_node, unit_node, uninterruptible_node, NodeRef};
use crate::effect::Effect;
use crate::tracing_compat::trace;
use crate::types::{AnyCause, Cause, ExitKind, Never, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub(crate) type ScopeFinalizer = Arc<dyn Fn(ExitKind) -> NodeRef + Send + Sync>;

struct ScopeState {
    finalizers: Vec<ScopeFinalizer>,
    closed: Option<ExitKind>,
}

/// An ordered set of finalizers with a single close.
#[derive(Clone)]
pub struct Scope {
    state: Arc<Mutex<ScopeState>>,
}

impl Scope {
    /// Creates an open scope.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScopeState {
                finalizers: Vec::new(),
                closed: None,
            })),
        }
    }

    /// An effect that creates an open scope.
    pub fn make<E: Value>() -> Effect<Self, E> {
        Effect::sync(Self::new)
    }

    /// Registers `finalizer` to run when the scope closes.
    ///
    /// If the scope is already closed, the finalizer runs immediately with
    /// the closing exit kind.
    pub fn add_finalizer<E: Value>(
        &self,
        finalizer: impl Fn(ExitKind) -> Effect<(), Never> + Send + Sync + 'static,
    ) -> Effect<(), E> {
        Effect::from_node(
            self.add_finalizer_node(Arc::new(move |kind: ExitKind| finalizer(kind).into_node())),
        )
    }

    /// Closes the scope, running every finalizer in reverse order.
    ///
    /// Closing twice is a no-op. Defects raised by finalizers are collected
    /// in order; every finalizer runs regardless.
    pub fn close<E: Value>(&self, kind: ExitKind) -> Effect<(), E> {
        Effect::from_node(self.close_node(kind))
    }

    /// Number of finalizers waiting for close.
    pub fn finalizer_count(&self) -> usize {
        self.state.lock().finalizers.len()
    }

    /// Whether the scope has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub(crate) fn add_finalizer_node(&self, finalizer: ScopeFinalizer) -> NodeRef {
        let state = Arc::clone(&self.state);
        suspend_node(move || {
            let mut st = state.lock();
            match st.closed {
                Some(kind) => {
                    drop(st);
                    uninterruptible_node(finalizer(kind))
                }
                None => {
                    st.finalizers.push(Arc::clone(&finalizer));
                    unit_node()
                }
            }
        })
    }

    pub(crate) fn close_node(&self, kind: ExitKind) -> NodeRef {
        let state = Arc::clone(&self.state);
        uninterruptible_node(suspend_node(move || {
            let finalizers = {
                let mut st = state.lock();
                if st.closed.is_some() {
                    return unit_node();
                }
                st.closed = Some(kind);
                std::mem::take(&mut st.finalizers)
            };
            trace!(finalizers = finalizers.len(), kind = %kind, "closing scope");
            run_finalizers(Arc::new(finalizers), kind, Cause::Empty)
        }))
    }
}

/// Runs the finalizers from last to first, accumulating their defects.
fn run_finalizers(remaining: Arc<Vec<ScopeFinalizer>>, kind: ExitKind, failed: AnyCause) -> NodeRef {
    let Some((last, rest)) = remaining.split_last() else {
        return if failed.is_empty() {
            unit_node()
        } else {
            fail_node(failed)
        };
    };
    let last = Arc::clone(last);
    let rest = Arc::new(rest.to_vec());
    let on_failure_rest = Arc::clone(&rest);
    let on_failure_acc = failed.clone();
    fold_node(
        suspend_node(move || last(kind)),
        move |cause| {
            run_finalizers(
                Arc::clone(&on_failure_rest),
                kind,
                on_failure_acc.clone().then(cause),
            )
        },
        move |_| run_finalizers(Arc::clone(&rest), kind, failed.clone()),
    )
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Tag for Scope {
    type Service = Self;

    fn name() -> &'static str {
        "Scope"
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Scope")
            .field("finalizers", &st.finalizers.len())
            .field("closed", &st.closed)
            .finish()
    }
}
