//! Bracket combinators for resource safety.
//!
//! The bracket pattern ensures that resources are always released, even when
//! errors or interruption occur. It follows the acquire/use/release pattern
//! familiar from RAII and try-finally.
//!
//! Acquisition always runs uninterruptibly, so a resource is either never
//! acquired or is guaranteed a release.
//!
//! Two styles are offered:
//!
//! - [`Effect::acquire_use_release`]: the release runs as soon as `use`
//!   finishes
//! - [`Effect::acquire_release`] inside [`Effect::scoped`]: the release is
//!   registered in the ambient [`Scope`] and runs when the scope closes, in
//!   reverse order of acquisition

use crate::context::scope::ScopeFinalizer;
use crate::context::{Context, Scope, ServiceKey};
use crate::effect::node::{
    ensuring_node, flat_map_node, succeed_node, suspend_node, uninterruptible_node, Node, NodeRef,
    Release,
};
use crate::effect::Effect;
use crate::types::{unerase, AnyValue, ExitKind, Never, Value};
use std::sync::Arc;

impl<A: Value, E: Value> Effect<A, E> {
    /// Acquires a resource whose `release` is registered in the ambient
    /// scope.
    ///
    /// Must run inside [`scoped`](Self::scoped) (or a layer build); without a
    /// scope it dies with a missing `Scope` service.
    pub fn acquire_release(
        acquire: Self,
        release: impl Fn(A, ExitKind) -> Effect<(), Never> + Send + Sync + 'static,
    ) -> Self {
        let release: Release =
            Arc::new(move |resource: AnyValue, kind: ExitKind| release(unerase(resource), kind).into_node());
        Self::from_node(Arc::new(Node::AcquireRelease {
            acquire: acquire.into_node(),
            release,
        }))
    }

    /// Acquires a resource, uses it, then releases it whatever the outcome
    /// of `use_resource`.
    ///
    /// Only `use_resource` can be interrupted.
    pub fn acquire_use_release<B: Value>(
        acquire: Self,
        use_resource: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
        release: impl Fn(A, ExitKind) -> Effect<(), Never> + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let use_resource = Arc::new(use_resource);
        let release = Arc::new(release);
        Effect::uninterruptible_mask(move |restore| {
            let use_resource = Arc::clone(&use_resource);
            let release = Arc::clone(&release);
            acquire.clone().flat_map(move |resource| {
                let release = Arc::clone(&release);
                let held = resource.clone();
                restore
                    .apply(use_resource(resource))
                    .on_exit(move |exit| release(held.clone(), exit.kind()))
            })
        })
    }

    /// Runs this effect with a fresh [`Scope`] and closes it afterwards with
    /// the effect's exit kind.
    pub fn scoped(self) -> Self {
        Self::from_node(scoped_node(self.into_node()))
    }
}

impl<E: Value> Effect<(), E> {
    /// Registers `finalizer` in the ambient scope.
    pub fn add_finalizer(
        finalizer: impl Fn(ExitKind) -> Effect<(), Never> + Send + Sync + 'static,
    ) -> Self {
        let finalizer: ScopeFinalizer = Arc::new(move |kind: ExitKind| finalizer(kind).into_node());
        Self::from_node(flat_map_node(scope_access(), move |scope| {
            let scope: Scope = unerase(scope);
            scope.add_finalizer_node(finalizer.clone())
        }))
    }
}

fn scope_access() -> NodeRef {
    Arc::new(Node::Access(ServiceKey::of::<Scope>()))
}

/// Runs `body` with a fresh scope and closes it with the body's exit kind.
pub(crate) fn scoped_node(body: NodeRef) -> NodeRef {
    suspend_node(move || {
        let scope = Scope::new();
        let closing = scope.clone();
        let provided = Arc::new(Node::Provide(Arc::clone(&body), Context::make::<Scope>(scope)));
        ensuring_node(provided, move |exit| closing.close_node(exit.kind()))
    })
}

pub(crate) fn lower_acquire_release(acquire: &NodeRef, release: &Release) -> NodeRef {
    let acquire = Arc::clone(acquire);
    let release = Arc::clone(release);
    flat_map_node(scope_access(), move |scope| {
        let scope: Scope = unerase(scope);
        let release = Arc::clone(&release);
        uninterruptible_node(flat_map_node(Arc::clone(&acquire), move |resource| {
            let held = Arc::clone(&resource);
            let release = Arc::clone(&release);
            let register = scope.add_finalizer_node(Arc::new(move |kind: ExitKind| release(Arc::clone(&held), kind)));
            flat_map_node(register, move |_| succeed_node(Arc::clone(&resource)))
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Ref;
    use crate::test_utils::test_runtime;
    use crate::types::Exit;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn resource(log: &Log, name: &'static str) -> Effect<&'static str, String> {
        let opened = Arc::clone(log);
        let closed = Arc::clone(log);
        Effect::acquire_release(
            Effect::sync(move || {
                opened.lock().push(format!("acquire {name}"));
                name
            }),
            move |name, kind| {
                let closed = Arc::clone(&closed);
                Effect::sync(move || closed.lock().push(format!("release {name} {kind}")))
            },
        )
    }

    #[test]
    fn scoped_releases_in_reverse_order() {
        init_test("scoped_releases_in_reverse_order");
        let runtime = test_runtime();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let program = resource(&log, "a")
            .zip(resource(&log, "b"))
            .zip(resource(&log, "c"))
            .as_unit()
            .scoped();
        runtime.run_sync(program).expect("succeeds");
        assert_eq!(
            *log.lock(),
            vec![
                "acquire a",
                "acquire b",
                "acquire c",
                "release c success",
                "release b success",
                "release a success",
            ]
        );
        crate::test_complete!("scoped_releases_in_reverse_order");
    }

    #[test]
    fn failure_after_acquire_still_releases() {
        init_test("failure_after_acquire_still_releases");
        let runtime = test_runtime();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let program = resource(&log, "a")
            .zip_right(Effect::<(), String>::fail("use failed".into()))
            .scoped();
        assert_eq!(runtime.run_sync_exit(program), Exit::fail("use failed".to_string()));
        assert_eq!(*log.lock(), vec!["acquire a", "release a failure"]);
        crate::test_complete!("failure_after_acquire_still_releases");
    }

    #[test]
    fn acquire_release_without_scope_dies() {
        init_test("acquire_release_without_scope_dies");
        let runtime = test_runtime();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let exit = runtime.run_sync_exit(resource(&log, "a"));
        assert!(exit.is_die());
        assert!(log.lock().is_empty(), "nothing may be acquired without a scope");
        crate::test_complete!("acquire_release_without_scope_dies");
    }

    #[test]
    fn acquire_use_release_on_interrupt() {
        init_test("acquire_use_release_on_interrupt");
        let runtime = test_runtime();
        let released = Ref::new(None::<ExitKind>);
        let record = released.clone();
        let program = Effect::<u32, Never>::acquire_use_release(
            Effect::succeed(1),
            |_| Effect::<u32, Never>::never(),
            move |_, kind| record.set(Some(kind)),
        );
        let outer = program.fork::<Never>().flat_map(|fiber| {
            Effect::<(), Never>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt())
        });
        let exit = runtime.run_sync(outer).expect("interrupt returns the exit");
        assert!(exit.is_interrupted());
        assert_eq!(released.get_now(), Some(ExitKind::Interrupted));
        crate::test_complete!("acquire_use_release_on_interrupt");
    }

    #[test]
    fn add_finalizer_runs_at_scope_end() {
        init_test("add_finalizer_runs_at_scope_end");
        let runtime = test_runtime();
        let seen = Ref::new(None::<ExitKind>);
        let record = seen.clone();
        let program = Effect::<(), String>::add_finalizer(move |kind| record.set(Some(kind)))
            .zip_right(Effect::<u8, String>::succeed(3))
            .scoped();
        assert_eq!(runtime.run_sync(program).ok(), Some(3));
        assert_eq!(seen.get_now(), Some(ExitKind::Success));
        crate::test_complete!("add_finalizer_runs_at_scope_end");
    }
}
