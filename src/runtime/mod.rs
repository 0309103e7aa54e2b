//! Runtime state and scheduling.
//!
//! This module contains the machinery that executes effects:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and the [`Runtime`] handle
//! - [`env_config`]: Environment variable and TOML overrides
//! - `scheduler`: Two-lane run queue shared by the workers
//! - `timer`: Timer heap and driver thread behind `sleep`
//! - `fiber_cell`: Per-fiber state, suspension and interruption
//! - `interpreter`: The step-by-step run loop
//! - [`task_handle`]: [`ExitFuture`] for observing fibers from async code
//! - `waker`: Bridges Rust futures into effects
//!
//! # Runtime Builder
//!
//! Runtimes are configured with a fluent, move-based builder API:
//!
//! ```ignore
//! use effectum::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(4).build()?;
//! let value = runtime.run_sync(Effect::<_, Never>::succeed(42))?;
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Global Runtime
//!
//! The free functions [`run_sync`](crate::run_sync), [`run_future`](crate::run_future)
//! and friends use a lazily built process-wide runtime configured from the
//! `EFFECTUM_*` environment variables.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod fiber_cell;
pub(crate) mod interpreter;
pub(crate) mod scheduler;
pub mod task_handle;
pub(crate) mod timer;
pub(crate) mod waker;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::RuntimeConfig;
pub use task_handle::ExitFuture;

use crate::effect::Effect;
use crate::error::{Error, FiberFailure};
use crate::fiber::Fiber;
use crate::runtime::scheduler::{Job, Scheduler};
use crate::runtime::timer::TimerDriver;
use crate::tracing_compat::debug;
use crate::types::{Cause, Defect, Exit, FiberId, Value};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Returns true when called from one of a runtime's worker threads.
pub(crate) fn is_worker_thread() -> bool {
    IN_WORKER.with(Cell::get)
}

/// State shared between the runtime handle, its threads and its fibers.
pub(crate) struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) timer: TimerDriver,
    shut_down: AtomicBool,
}

impl RuntimeShared {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            scheduler: Scheduler::new(),
            timer: TimerDriver::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops the workers and timer. Queued fibers finish with a defect.
    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("runtime shutting down");
        self.timer.shutdown();
        for job in self.scheduler.shutdown() {
            if let Job::Fiber(fiber) = job {
                let defect = Defect::new("runtime is shut down").with_fiber(fiber.id());
                fiber.complete(Exit::Failure(Cause::Die(defect)));
            }
        }
    }
}

/// Body of every worker thread.
pub(crate) fn worker_loop(shared: &Arc<RuntimeShared>) {
    IN_WORKER.with(|flag| flag.set(true));
    if let Some(callback) = shared.config.on_thread_start.as_ref() {
        callback();
    }
    while let Some(job) = shared.scheduler.next() {
        match job {
            Job::Fiber(fiber) => fiber.run_turn(),
            Job::Task(task) => task(),
        }
    }
    if let Some(callback) = shared.config.on_thread_stop.as_ref() {
        callback();
    }
    IN_WORKER.with(|flag| flag.set(false));
}

static GLOBAL: OnceLock<Result<Runtime, Error>> = OnceLock::new();

/// Returns the process-wide runtime, building it on first use.
///
/// The global runtime reads the `EFFECTUM_*` environment variables once. If
/// building it fails, every later call returns the same error.
pub fn global() -> Result<&'static Runtime, Error> {
    GLOBAL
        .get_or_init(|| RuntimeBuilder::new().with_env_overrides()?.build())
        .as_ref()
        .map_err(Clone::clone)
}

/// Runs `effect` on the global runtime, blocking until it finishes.
///
/// If the global runtime cannot be built, the failure is reported as a defect.
pub fn run_sync<A: Value, E: Value>(effect: Effect<A, E>) -> Result<A, FiberFailure<E>> {
    match global() {
        Ok(runtime) => runtime.run_sync(effect),
        Err(err) => Err(FiberFailure::new(FiberId::NONE, startup_defect(&err))),
    }
}

/// Runs `effect` on the global runtime and returns its [`Exit`].
pub fn run_sync_exit<A: Value, E: Value>(effect: Effect<A, E>) -> Exit<A, E> {
    match global() {
        Ok(runtime) => runtime.run_sync_exit(effect),
        Err(err) => Exit::Failure(startup_defect(&err)),
    }
}

/// Starts `effect` on the global runtime and returns a future of its exit.
pub fn run_future<A: Value, E: Value>(effect: Effect<A, E>) -> ExitFuture<A, E> {
    match global() {
        Ok(runtime) => runtime.run_future(effect),
        Err(err) => ExitFuture::ready(FiberId::NONE, Exit::Failure(startup_defect(&err))),
    }
}

/// Starts `effect` as a root fiber on the global runtime.
pub fn run_fork<A: Value, E: Value>(effect: Effect<A, E>) -> Result<Fiber<A, E>, Error> {
    global()?.run_fork(effect)
}

fn startup_defect<E>(err: &Error) -> Cause<E> {
    Cause::Die(Defect::new(format!("global runtime unavailable: {err}")))
}
