//! Runtime builder and handle.
//!
//! [`RuntimeBuilder`] resolves a [`RuntimeConfig`] and [`Runtime`] owns the
//! threads that execute effects: `worker_threads` workers sharing one run
//! queue, plus a timer thread driving `sleep` and `timeout`.

use crate::effect::Effect;
use crate::error::{Error, ErrorKind, FiberFailure};
use crate::fiber::Fiber;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fiber_cell::FiberCell;
use crate::runtime::task_handle::{ExitFuture, ExitSlot};
use crate::runtime::{is_worker_thread, worker_loop, RuntimeShared};
use crate::combinator::join::Concurrency;
use crate::context::Context;
use crate::tracing_compat::{debug, info};
use crate::types::{AnyExit, Cause, Defect, Exit, FiberId, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Create a builder from defaults overlaid with the `EFFECTUM_*`
    /// environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new().with_env_overrides()
    }

    /// Apply environment variable overrides to the current configuration.
    ///
    /// Call this before programmatic setters so that explicit builder calls
    /// keep the highest precedence.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        crate::runtime::env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Create a builder from a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let toml = crate::runtime::env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        crate::runtime::env_config::apply_toml_config(&mut builder.config, &toml);
        Ok(builder)
    }

    /// Create a builder from TOML text.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, Error> {
        let parsed = crate::runtime::env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        crate::runtime::env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the timer thread name.
    #[must_use]
    pub fn timer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.timer_thread_name = name.into();
        self
    }

    /// Set how many interpreter steps a fiber takes before yielding.
    #[must_use]
    pub fn ops_budget(mut self, budget: u32) -> Self {
        self.config.ops_budget = budget;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Returns the configuration resolved so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config)
    }

    /// Single worker runtime.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Multi-threaded runtime with defaults.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }

    /// Low-latency preset: fibers yield their worker more often.
    #[must_use]
    pub fn low_latency() -> Self {
        Self::new().ops_budget(128)
    }
}

/// Runtime instance created from a [`RuntimeBuilder`].
///
/// Cloning is cheap; the threads stop when the last clone is dropped or when
/// [`shutdown`](Self::shutdown) is called. Fibers still queued at that point
/// finish with a defect.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    shared: Arc<RuntimeShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        validate(&config)?;
        let shared = Arc::new(RuntimeShared::new(config));
        let inner = Arc::new(RuntimeInner {
            shared: Arc::clone(&shared),
            threads: Mutex::new(Vec::new()),
        });

        let timer_shared = Arc::clone(&shared);
        let timer = std::thread::Builder::new()
            .name(shared.config.timer_thread_name.clone())
            .spawn(move || timer_shared.timer.run())
            .map_err(spawn_error)?;
        inner.threads.lock().push(timer);

        for index in 0..shared.config.worker_threads {
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", shared.config.thread_name_prefix))
                .stack_size(shared.config.thread_stack_size)
                .spawn(move || worker_loop(&worker_shared))
                .map_err(spawn_error)?;
            inner.threads.lock().push(handle);
        }

        info!(
            workers = shared.config.worker_threads,
            ops_budget = shared.config.ops_budget,
            "runtime started"
        );
        Ok(Self { inner })
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.shared.config
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shared.is_shut_down()
    }

    /// Starts `effect` on a new root fiber and returns its handle.
    ///
    /// Fails with [`ErrorKind::Shutdown`] if the runtime has stopped.
    pub fn run_fork<A: Value, E: Value>(&self, effect: Effect<A, E>) -> Result<Fiber<A, E>, Error> {
        if self.is_shut_down() {
            return Err(Error::new(ErrorKind::Shutdown).with_message("runtime is shut down"));
        }
        let cell = self.root_fiber(effect);
        cell.start();
        Ok(Fiber::from_cell(cell))
    }

    /// Runs `effect` to completion, blocking the calling thread.
    ///
    /// Called from a worker thread this would deadlock the pool, so it
    /// returns a defect instead.
    pub fn run_sync_exit<A: Value, E: Value>(&self, effect: Effect<A, E>) -> Exit<A, E> {
        Exit::from_any(self.block_on_root(effect).1)
    }

    /// Runs `effect` to completion and returns its value or a [`FiberFailure`].
    pub fn run_sync<A: Value, E: Value>(&self, effect: Effect<A, E>) -> Result<A, FiberFailure<E>> {
        let (fiber, exit) = self.block_on_root(effect);
        match Exit::<A, E>::from_any(exit) {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(FiberFailure::new(fiber, cause)),
        }
    }

    /// Starts `effect` and returns a future that resolves to its exit.
    ///
    /// The fiber runs on the worker pool whether or not the future is polled.
    pub fn run_future<A: Value, E: Value>(&self, effect: Effect<A, E>) -> ExitFuture<A, E> {
        let cell = self.root_fiber(effect);
        let (future, completer) = ExitFuture::pending(cell.id());
        cell.add_observer(Box::new(move |exit| completer.complete(exit)));
        cell.start();
        future
    }

    /// Stops the worker and timer threads.
    ///
    /// Fibers still queued finish with a defect. Fibers suspended on external
    /// callbacks are left parked. Calling this from a worker thread signals
    /// the other threads but does not wait for them.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn root_fiber<A: Value, E: Value>(&self, effect: Effect<A, E>) -> Arc<FiberCell> {
        let cell = FiberCell::new(
            Arc::clone(&self.inner.shared),
            effect.into_node(),
            Context::empty(),
            Concurrency::Unbounded,
            None,
        );
        debug!(fiber = %cell.id(), "root fiber created");
        cell
    }

    fn block_on_root<A: Value, E: Value>(&self, effect: Effect<A, E>) -> (FiberId, AnyExit) {
        if is_worker_thread() {
            let defect = Defect::new("run_sync called from a runtime worker thread");
            return (FiberId::NONE, Exit::Failure(Cause::Die(defect)));
        }
        let cell = self.root_fiber(effect);
        let slot = Arc::new(ExitSlot::new());
        let filler = Arc::clone(&slot);
        cell.add_observer(Box::new(move |exit| filler.fill(exit.clone())));
        cell.start();
        (cell.id(), slot.wait())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.config())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl RuntimeInner {
    fn shutdown(&self) {
        self.shared.shutdown();
        let current = std::thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                debug!("runtime thread panicked during shutdown");
            }
        }
        info!("runtime stopped");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate(config: &RuntimeConfig) -> Result<(), Error> {
    if config.thread_name_prefix.contains('\0') {
        return Err(Error::invalid_config(
            "thread_name_prefix must not contain NUL bytes",
        ));
    }
    if config.timer_thread_name.contains('\0') {
        return Err(Error::invalid_config(
            "timer_thread_name must not contain NUL bytes",
        ));
    }
    Ok(())
}

fn spawn_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::ThreadSpawn)
        .with_message("failed to spawn runtime thread")
        .with_source(err)
}
