//! Runtime builder and the assembled [`Runtime`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{open_scope_with, ScopeOptions};
use crate::cx::Scope;
use crate::error;
use crate::executor::{
    PoolHandle, PoolOptions, Propagating, ScheduledExecutor, ThreadPool, UiDispatcher,
};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config;
use crate::tracing_compat::{debug, info};
use crate::types::builder::BuildError;

/// Builder for constructing a runtime with custom configuration.
///
/// Values set on the builder win over environment variables (when
/// [`from_env`](Self::from_env) is used), which win over a config file,
/// which wins over defaults.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    overrides: Overrides,
    read_env: bool,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Default)]
struct Overrides {
    pool_threads: Option<(usize, usize)>,
    idle_timeout: Option<Duration>,
    thread_name_prefix: Option<String>,
    scheduler_thread_name: Option<String>,
    ui_thread_name: Option<String>,
    enable_ui_thread: Option<bool>,
    scope_deadline: Option<Option<Duration>>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder that also honours `STRAND_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            read_env: true,
            ..Self::default()
        }
    }

    /// Load settings from a TOML file before env and builder overrides.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Set the pool's thread limits.
    #[must_use]
    pub fn pool_threads(mut self, min: usize, max: usize) -> Self {
        self.overrides.pool_threads = Some((min, max));
        self
    }

    /// Set how long surplus pool threads idle before retiring.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.idle_timeout = Some(timeout);
        self
    }

    /// Set the pool thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.overrides.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set the timer thread name.
    #[must_use]
    pub fn scheduler_thread_name(mut self, name: impl Into<String>) -> Self {
        self.overrides.scheduler_thread_name = Some(name.into());
        self
    }

    /// Set the dispatch thread name.
    #[must_use]
    pub fn ui_thread_name(mut self, name: impl Into<String>) -> Self {
        self.overrides.ui_thread_name = Some(name.into());
        self
    }

    /// Enable or disable the dispatch thread.
    #[must_use]
    pub fn enable_ui_thread(mut self, enable: bool) -> Self {
        self.overrides.enable_ui_thread = Some(enable);
        self
    }

    /// Bound the wait in [`Runtime::open_scope`]. `None` removes the bound.
    #[must_use]
    pub fn scope_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.overrides.scope_deadline = Some(deadline);
        self
    }

    /// Resolves the configuration without starting any threads.
    pub fn resolve(&self) -> Result<RuntimeConfig, BuildError> {
        let mut config = RuntimeConfig::default();

        #[cfg(feature = "config-file")]
        if let Some(path) = &self.config_file {
            let toml = env_config::parse_toml_file(path)?;
            env_config::apply_toml_config(&mut config, &toml);
        }

        if self.read_env {
            env_config::apply_env_overrides(&mut config)?;
        }

        self.overrides.apply(&mut config);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Starts the pool, the timer thread, and (if enabled) the dispatch
    /// thread.
    pub fn build(self) -> Result<Runtime, BuildError> {
        let config = self.resolve()?;
        Runtime::with_config(config)
    }
}

impl Overrides {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some((min, max)) = self.pool_threads {
            config.pool.min_threads = min;
            config.pool.max_threads = max;
        }
        if let Some(timeout) = self.idle_timeout {
            config.pool.idle_timeout = timeout;
        }
        if let Some(prefix) = &self.thread_name_prefix {
            config.thread_name_prefix.clone_from(prefix);
        }
        if let Some(name) = &self.scheduler_thread_name {
            config.scheduler_thread_name.clone_from(name);
        }
        if let Some(name) = &self.ui_thread_name {
            config.ui_thread_name.clone_from(name);
        }
        if let Some(enable) = self.enable_ui_thread {
            config.enable_ui_thread = enable;
        }
        if let Some(deadline) = self.scope_deadline {
            config.scope_deadline = deadline;
        }
    }
}

/// A pool, a timer, and an optional dispatch thread, all propagating.
///
/// Cloning shares the same threads. When the last clone drops, the timer
/// and dispatch threads stop and the pool drains.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    // Kept alive so submissions through `executor` are served.
    threads: ThreadPool,
    executor: Propagating<PoolHandle>,
    scheduler: Propagating<ScheduledExecutor>,
    ui: Option<Propagating<UiDispatcher>>,
}

impl Runtime {
    /// Starts a runtime from an already resolved configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, BuildError> {
        config.normalize();
        config.validate()?;

        let threads = ThreadPool::with_options(
            config.pool.min_threads,
            config.pool.max_threads,
            PoolOptions {
                idle_timeout: config.pool.idle_timeout,
                thread_name_prefix: config.thread_name_prefix.clone(),
            },
        );
        let scheduler =
            ScheduledExecutor::with_thread_name(threads.handle(), &*config.scheduler_thread_name)
                .map_err(|e| BuildError::StartFailed {
                    component: "scheduler",
                    reason: e.to_string(),
                })?;
        let ui = if config.enable_ui_thread {
            match UiDispatcher::new(&*config.ui_thread_name) {
                Ok(ui) => Some(Propagating::new(ui)),
                Err(e) => {
                    scheduler.shutdown();
                    return Err(BuildError::StartFailed {
                        component: "ui",
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            None
        };

        info!(
            min_threads = config.pool.min_threads,
            max_threads = config.pool.max_threads,
            ui = ui.is_some(),
            "runtime started"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                executor: Propagating::new(threads.handle()),
                threads,
                scheduler: Propagating::new(scheduler),
                ui,
                config,
            }),
        })
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The propagating pool executor.
    #[must_use]
    pub fn pool(&self) -> &Propagating<PoolHandle> {
        &self.inner.executor
    }

    /// The propagating scheduled executor, backed by the pool.
    #[must_use]
    pub fn scheduler(&self) -> &Propagating<ScheduledExecutor> {
        &self.inner.scheduler
    }

    /// The propagating dispatch thread, if enabled.
    #[must_use]
    pub fn ui(&self) -> Option<&Propagating<UiDispatcher>> {
        self.inner.ui.as_ref()
    }

    /// [`open_scope`](crate::open_scope) bounded by the configured
    /// `scope_deadline`.
    pub fn open_scope<T>(
        &self,
        body: impl FnOnce(&Scope) -> error::Result<T>,
    ) -> error::Result<T> {
        open_scope_with(
            ScopeOptions {
                deadline: self.inner.config.scope_deadline,
            },
            body,
        )
    }

    /// Stops the timer and dispatch threads, then drains the pool.
    ///
    /// Pending timers and queued dispatch tasks resolve as cancelled.
    /// Returns `true` if every pool thread exited within `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.stop_threads();
        self.inner.threads.shutdown_and_wait(timeout)
    }
}

impl RuntimeInner {
    fn stop_threads(&self) {
        self.scheduler.inner().shutdown();
        if let Some(ui) = &self.ui {
            ui.inner().shutdown();
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        debug!("runtime dropped, stopping threads");
        self.stop_threads();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.threads)
            .field("ui", &self.inner.ui.is_some())
            .finish()
    }
}
