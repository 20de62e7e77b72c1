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
//! | `pool.min_threads` | 1 |
//! | `pool.max_threads` | 4 x available parallelism |
//! | `pool.idle_timeout` | 10 s |
//! | `thread_name_prefix` | `"strand"` |
//! | `scheduler_thread_name` | `"strand-scheduler"` |
//! | `ui_thread_name` | `"strand-ui"` |
//! | `enable_ui_thread` | true |
//! | `scope_deadline` | `None` (wait as long as it takes) |

use std::time::Duration;

use crate::types::builder::BuildError;

/// Configuration for the propagating thread pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Threads kept alive while idle.
    pub min_threads: usize,
    /// Upper bound on pool threads.
    pub max_threads: usize,
    /// Idle time after which threads above `min_threads` retire.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: RuntimeConfig::default_max_threads(),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_threads == 0 {
            self.max_threads = 1;
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Thread pool configuration.
    pub pool: PoolConfig,
    /// Name prefix for pool threads.
    pub thread_name_prefix: String,
    /// Name of the timer thread.
    pub scheduler_thread_name: String,
    /// Name of the serialized dispatch thread.
    pub ui_thread_name: String,
    /// Whether to start the dispatch thread at all.
    pub enable_ui_thread: bool,
    /// Bound on how long [`Runtime::open_scope`](super::Runtime::open_scope)
    /// waits for children after its body returns.
    pub scope_deadline: Option<Duration>,
}

impl RuntimeConfig {
    /// Default pool ceiling: four threads per available core.
    #[must_use]
    pub fn default_max_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(4, std::num::NonZeroUsize::get)
            .saturating_mul(4)
    }

    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        self.pool.normalize();
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.pool.min_threads > self.pool.max_threads {
            return Err(BuildError::invalid_range(
                "pool_threads",
                self.pool.min_threads as u64,
                self.pool.max_threads as u64,
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(BuildError::invalid_value(
                "thread_name_prefix",
                "must not be empty",
            ));
        }
        if self.scope_deadline == Some(Duration::ZERO) {
            return Err(BuildError::invalid_value(
                "scope_deadline",
                "must be positive; use None for no deadline",
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            thread_name_prefix: "strand".to_string(),
            scheduler_thread_name: "strand-scheduler".to_string(),
            ui_thread_name: "strand-ui".to_string(),
            enable_ui_thread: true,
            scope_deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pool.max_threads >= config.pool.min_threads);
    }

    #[test]
    fn inverted_range_rejected() {
        let mut config = RuntimeConfig::default();
        config.pool.min_threads = 8;
        config.pool.max_threads = 2;
        assert_eq!(
            config.validate(),
            Err(BuildError::invalid_range("pool_threads", 8_u64, 2_u64))
        );
    }

    #[test]
    fn zero_max_normalizes_to_one() {
        let mut config = RuntimeConfig::default();
        config.pool.min_threads = 0;
        config.pool.max_threads = 0;
        config.normalize();
        assert_eq!(config.pool.max_threads, 1);
    }

    #[test]
    fn zero_deadline_rejected() {
        let config = RuntimeConfig {
            scope_deadline: Some(Duration::ZERO),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BuildError::InvalidValue { field: "scope_deadline", .. })
        ));
    }
}
