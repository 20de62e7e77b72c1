//! Outside sources of runtime settings: `STRAND_*` environment variables
//! and, with the `config-file` feature, a TOML file.
//!
//! [`RuntimeBuilder`](super::builder::RuntimeBuilder) layers them as
//! follows, later layers overriding earlier ones:
//!
//! 1. [`RuntimeConfig::default()`]
//! 2. the TOML file, if one was given
//! 3. environment variables, if the builder came from `from_env()`
//! 4. builder setters such as `pool_threads(1, 8)`
//!
//! # Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STRAND_POOL_MIN_THREADS` | `usize` | `pool.min_threads` |
//! | `STRAND_POOL_MAX_THREADS` | `usize` | `pool.max_threads` |
//! | `STRAND_POOL_IDLE_TIMEOUT_MS` | `u64` | `pool.idle_timeout` |
//! | `STRAND_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `STRAND_SCHEDULER_THREAD_NAME` | `String` | `scheduler_thread_name` |
//! | `STRAND_UI_THREAD_NAME` | `String` | `ui_thread_name` |
//! | `STRAND_ENABLE_UI_THREAD` | `bool` | `enable_ui_thread` |
//! | `STRAND_SCOPE_DEADLINE_MS` | `u64` | `scope_deadline` (0 = none) |

use std::time::Duration;

use crate::runtime::config::RuntimeConfig;
use crate::types::builder::BuildError;

/// Environment variable name for the pool's minimum thread count.
pub const ENV_POOL_MIN_THREADS: &str = "STRAND_POOL_MIN_THREADS";
/// Environment variable name for the pool's maximum thread count.
pub const ENV_POOL_MAX_THREADS: &str = "STRAND_POOL_MAX_THREADS";
/// Environment variable name for the pool idle timeout in milliseconds.
pub const ENV_POOL_IDLE_TIMEOUT_MS: &str = "STRAND_POOL_IDLE_TIMEOUT_MS";
/// Environment variable name for the pool thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "STRAND_THREAD_NAME_PREFIX";
/// Environment variable name for the timer thread name.
pub const ENV_SCHEDULER_THREAD_NAME: &str = "STRAND_SCHEDULER_THREAD_NAME";
/// Environment variable name for the dispatch thread name.
pub const ENV_UI_THREAD_NAME: &str = "STRAND_UI_THREAD_NAME";
/// Environment variable name for starting the dispatch thread.
pub const ENV_ENABLE_UI_THREAD: &str = "STRAND_ENABLE_UI_THREAD";
/// Environment variable name for the scope wait deadline in milliseconds.
pub const ENV_SCOPE_DEADLINE_MS: &str = "STRAND_SCOPE_DEADLINE_MS";

/// Overwrites the fields of `config` whose variable is set.
///
/// A variable that is set but does not parse is an error; unset
/// variables leave the field alone.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_POOL_MIN_THREADS) {
        config.pool.min_threads = parse_usize(ENV_POOL_MIN_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_MAX_THREADS) {
        config.pool.max_threads = parse_usize(ENV_POOL_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_IDLE_TIMEOUT_MS) {
        config.pool.idle_timeout =
            Duration::from_millis(parse_u64(ENV_POOL_IDLE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_SCHEDULER_THREAD_NAME) {
        config.scheduler_thread_name = val;
    }
    if let Some(val) = read_env(ENV_UI_THREAD_NAME) {
        config.ui_thread_name = val;
    }
    if let Some(val) = read_env(ENV_ENABLE_UI_THREAD) {
        config.enable_ui_thread = parse_bool(ENV_ENABLE_UI_THREAD, &val)?;
    }
    if let Some(val) = read_env(ENV_SCOPE_DEADLINE_MS) {
        config.scope_deadline = deadline_from_millis(parse_u64(ENV_SCOPE_DEADLINE_MS, &val)?);
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

const fn deadline_from_millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, BuildError> {
    val.trim().parse::<usize>().map_err(|e| {
        BuildError::custom(format!(
            "{var_name}={val:?} is not a non-negative integer ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, BuildError> {
    val.trim().parse::<u64>().map_err(|e| {
        BuildError::custom(format!(
            "{var_name}={val:?} is not a millisecond count ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, BuildError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BuildError::custom(format!(
            "{var_name}={val:?} is not a boolean (use true/false, yes/no, on/off or 1/0)"
        ))),
    }
}

/// The TOML file layout. Absent keys keep the current value:
///
/// ```toml
/// [pool]
/// min_threads = 1
/// max_threads = 32
/// idle_timeout_ms = 10000
/// thread_name_prefix = "myapp"
///
/// [scheduler]
/// thread_name = "myapp-timer"
///
/// [ui]
/// enabled = true
/// thread_name = "myapp-ui"
///
/// [scope]
/// deadline_ms = 30000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolToml,
    /// Timer thread settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Dispatch thread settings.
    #[serde(default)]
    pub ui: UiToml,
    /// Scope settings.
    #[serde(default)]
    pub scope: ScopeToml,
}

/// `[pool]`
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Minimum number of pool threads.
    pub min_threads: Option<usize>,
    /// Maximum number of pool threads.
    pub max_threads: Option<usize>,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Name prefix for pool threads.
    pub thread_name_prefix: Option<String>,
}

/// `[scheduler]`
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Timer thread name.
    pub thread_name: Option<String>,
}

/// `[ui]`
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct UiToml {
    /// Start the dispatch thread.
    pub enabled: Option<bool>,
    /// Dispatch thread name.
    pub thread_name: Option<String>,
}

/// `[scope]`
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ScopeToml {
    /// Wait deadline in milliseconds (0 = none).
    pub deadline_ms: Option<u64>,
}

/// Copies every key present in `toml` into `config`.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.pool.min_threads {
        config.pool.min_threads = v;
    }
    if let Some(v) = toml.pool.max_threads {
        config.pool.max_threads = v;
    }
    if let Some(v) = toml.pool.idle_timeout_ms {
        config.pool.idle_timeout = Duration::from_millis(v);
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(ref v) = toml.scheduler.thread_name {
        config.scheduler_thread_name.clone_from(v);
    }
    if let Some(v) = toml.ui.enabled {
        config.enable_ui_thread = v;
    }
    if let Some(ref v) = toml.ui.thread_name {
        config.ui_thread_name.clone_from(v);
    }
    if let Some(v) = toml.scope.deadline_ms {
        config.scope_deadline = deadline_from_millis(v);
    }
}

/// Parses TOML text.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, BuildError> {
    toml::from_str(toml_str)
        .map_err(|e| BuildError::custom(format!("malformed runtime config: {e}")))
}

/// Reads and parses the TOML file at `path`.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::custom(format!(
            "cannot read runtime config {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}
