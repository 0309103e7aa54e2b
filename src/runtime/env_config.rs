//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `EFFECTUM_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EFFECTUM_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `EFFECTUM_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `EFFECTUM_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `EFFECTUM_TIMER_THREAD_NAME` | `String` | `timer_thread_name` |
//! | `EFFECTUM_OPS_BUDGET` | `u32` | `ops_budget` |

use crate::error::Error;
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "EFFECTUM_WORKER_THREADS";
/// Environment variable name for worker stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "EFFECTUM_THREAD_STACK_SIZE";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "EFFECTUM_THREAD_NAME_PREFIX";
/// Environment variable name for the timer thread name.
pub const ENV_TIMER_THREAD_NAME: &str = "EFFECTUM_TIMER_THREAD_NAME";
/// Environment variable name for the per-fiber ops budget.
pub const ENV_OPS_BUDGET: &str = "EFFECTUM_OPS_BUDGET";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), Error> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_TIMER_THREAD_NAME) {
        config.timer_thread_name = val;
    }
    if let Some(val) = read_env(ENV_OPS_BUDGET) {
        config.ops_budget = parse_u32(ENV_OPS_BUDGET, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, Error> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32, Error> {
    val.trim().parse::<u32>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected u32, got {val:?} ({e})"
        ))
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// ops_budget = 1024
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
///
/// [timer]
/// thread_name = "myapp-timer"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Timer settings.
    #[serde(default)]
    pub timer: TimerToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Interpreter steps per fiber turn.
    pub ops_budget: Option<u32>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Timer section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TimerToml {
    /// Name of the timer thread.
    pub thread_name: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.ops_budget {
        config.ops_budget = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(ref v) = toml.timer.thread_name {
        config.timer_thread_name.clone_from(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, Error> {
    toml::from_str(toml_str).map_err(|e| {
        Error::new(crate::error::ErrorKind::ConfigFile)
            .with_message(format!("failed to parse TOML config: {e}"))
    })
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::new(crate::error::ErrorKind::ConfigFile)
            .with_message(format!("failed to read config file {}", path.display()))
            .with_source(e)
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_WORKER_THREADS,
            ENV_THREAD_STACK_SIZE,
            ENV_THREAD_NAME_PREFIX,
            ENV_TIMER_THREAD_NAME,
            ENV_OPS_BUDGET,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
    }

    #[test]
    fn parse_usize_invalid() {
        assert!(super::parse_usize("TEST", "abc").is_err());
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_u32_invalid() {
        let err = super::parse_u32("TEST", "99999999999").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    // --- env overrides ---

    #[test]
    fn env_overrides_multiple() {
        with_envs(
            &[
                (ENV_WORKER_THREADS, "3"),
                (ENV_OPS_BUDGET, "64"),
                (ENV_THREAD_NAME_PREFIX, "svc"),
                (ENV_TIMER_THREAD_NAME, "svc-timer"),
                (ENV_THREAD_STACK_SIZE, "65536"),
            ],
            || {
                let mut config = RuntimeConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.worker_threads, 3);
                assert_eq!(config.ops_budget, 64);
                assert_eq!(config.thread_name_prefix, "svc");
                assert_eq!(config.timer_thread_name, "svc-timer");
                assert_eq!(config.thread_stack_size, 65_536);
            },
        );
    }

    #[test]
    fn env_overrides_unset_vars_leave_defaults() {
        with_clean_env(|| {
            let mut config = RuntimeConfig::default();
            let defaults = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.worker_threads, defaults.worker_threads);
            assert_eq!(config.ops_budget, defaults.ops_budget);
        });
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        with_envs(&[(ENV_WORKER_THREADS, "many")], || {
            let mut config = RuntimeConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert!(err.to_string().contains(ENV_WORKER_THREADS), "{err}");
        });
    }
}

#[cfg(all(test, feature = "config-file"))]
mod toml_tests {
    use super::*;

    #[test]
    fn parse_toml_full_config() {
        let toml_str = r#"
[scheduler]
worker_threads = 8
ops_budget = 256
thread_stack_size = 4194304
thread_name_prefix = "myapp"

[timer]
thread_name = "myapp-timer"
"#;
        let parsed = parse_toml_str(toml_str).unwrap();
        assert_eq!(parsed.scheduler.worker_threads, Some(8));
        assert_eq!(parsed.scheduler.ops_budget, Some(256));
        assert_eq!(parsed.scheduler.thread_stack_size, Some(4_194_304));
        assert_eq!(parsed.scheduler.thread_name_prefix.as_deref(), Some("myapp"));
        assert_eq!(parsed.timer.thread_name.as_deref(), Some("myapp-timer"));
    }

    #[test]
    fn parse_toml_empty_config() {
        let parsed = parse_toml_str("").unwrap();
        assert_eq!(parsed.scheduler.worker_threads, None);
        assert_eq!(parsed.timer.thread_name, None);
    }

    #[test]
    fn parse_toml_invalid_syntax() {
        let result = parse_toml_str("not valid toml {{{{");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("TOML"));
    }

    #[test]
    fn apply_toml_overrides_config() {
        let parsed = parse_toml_str("[scheduler]\nworker_threads = 16\n").unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.worker_threads, 16);
        assert_eq!(config.ops_budget, RuntimeConfig::default().ops_budget);
    }

    #[test]
    fn toml_file_not_found() {
        let result = parse_toml_file(std::path::Path::new("/nonexistent/config.toml"));
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("failed to read"));
    }

    #[test]
    fn toml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.toml");
        std::fs::write(&path, "[scheduler]\nworker_threads = 2\nops_budget = 64\n").unwrap();

        let parsed = parse_toml_file(&path).unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.ops_budget, 64);
    }
}
