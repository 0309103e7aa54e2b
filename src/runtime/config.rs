//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"effectum-worker"` |
//! | `timer_thread_name` | `"effectum-timer"` |
//! | `ops_budget` | 2048 |

use std::fmt;
use std::sync::Arc;

/// Default worker stack size in bytes.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
/// Default number of interpreter steps a fiber runs before yielding its worker.
pub const DEFAULT_OPS_BUDGET: u32 = 2048;

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Name of the timer thread.
    pub timer_thread_name: String,
    /// Interpreter steps a fiber may take before yielding to other fibers.
    pub ops_budget: u32,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.ops_budget == 0 {
            self.ops_budget = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "effectum-worker".to_string();
        }
        if self.timer_thread_name.is_empty() {
            self.timer_thread_name = "effectum-timer".to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "effectum-worker".to_string(),
            timer_thread_name: "effectum-timer".to_string(),
            ops_budget: DEFAULT_OPS_BUDGET,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("timer_thread_name", &self.timer_thread_name)
            .field("ops_budget", &self.ops_budget)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = RuntimeConfig::default();
        crate::assert_with_log!(
            config.worker_threads >= 1,
            "worker_threads",
            true,
            config.worker_threads >= 1
        );
        crate::assert_with_log!(
            config.thread_stack_size == DEFAULT_STACK_SIZE,
            "thread_stack_size",
            DEFAULT_STACK_SIZE,
            config.thread_stack_size
        );
        crate::assert_with_log!(
            config.ops_budget == DEFAULT_OPS_BUDGET,
            "ops_budget",
            DEFAULT_OPS_BUDGET,
            config.ops_budget
        );
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_normalize_enforces_minimums() {
        init_test("test_normalize_enforces_minimums");
        let mut config = RuntimeConfig {
            worker_threads: 0,
            thread_stack_size: 0,
            thread_name_prefix: String::new(),
            timer_thread_name: String::new(),
            ops_budget: 0,
            on_thread_start: None,
            on_thread_stop: None,
        };

        config.normalize();
        crate::assert_with_log!(
            config.worker_threads == 1,
            "worker_threads",
            1,
            config.worker_threads
        );
        crate::assert_with_log!(config.ops_budget == 1, "ops_budget", 1, config.ops_budget);
        crate::assert_with_log!(
            config.thread_name_prefix == "effectum-worker",
            "thread_name_prefix",
            "effectum-worker",
            config.thread_name_prefix
        );
        crate::assert_with_log!(
            config.timer_thread_name == "effectum-timer",
            "timer_thread_name",
            "effectum-timer",
            config.timer_thread_name
        );
        crate::test_complete!("test_normalize_enforces_minimums");
    }

    #[test]
    fn test_debug_hides_callbacks() {
        let mut config = RuntimeConfig::default();
        config.on_thread_start = Some(Arc::new(|| {}));
        let text = format!("{config:?}");
        assert!(text.contains("on_thread_start: true"), "{text}");
        assert!(text.contains("on_thread_stop: false"), "{text}");
    }
}
