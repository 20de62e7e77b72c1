//! Runtime assembly: configuration, environment overrides, and the builder.
//!
//! A [`Runtime`] bundles the executors most programs need, each already
//! wrapped so submissions propagate context and join the job tree:
//!
//! - a growing [`ThreadPool`](crate::executor::ThreadPool)
//! - a [`ScheduledExecutor`](crate::executor::ScheduledExecutor) that
//!   hands due work to the pool
//! - an optional [`UiDispatcher`](crate::executor::UiDispatcher)
//!
//! # Quick Start
//!
//! ```
//! use strand::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new()
//!     .pool_threads(1, 4)
//!     .enable_ui_thread(false)
//!     .build()
//!     .expect("runtime");
//!
//! let sum = runtime
//!     .open_scope(|_scope| {
//!         let a = runtime.pool().submit(|| Ok(1))?;
//!         let b = runtime.pool().submit(|| Ok(2))?;
//!         Ok(a.join()? + b.join()?)
//!     })
//!     .expect("scope");
//! assert_eq!(sum, 3);
//! ```
//!
//! # Configuration Reference (Defaults + Notes)
//!
//! - `pool_threads(min, max)`: default = 1..4 x cores. `min > max` is rejected.
//! - `idle_timeout`: default = 10 s. Surplus threads retire after idling this long.
//! - `thread_name_prefix`: default = `strand`. Pool threads are named `{prefix}-pool-{n}`.
//! - `scheduler_thread_name`: default = `strand-scheduler`.
//! - `ui_thread_name`: default = `strand-ui`.
//! - `enable_ui_thread`: default = true.
//! - `scope_deadline`: default = None. Bounds [`Runtime::open_scope`]'s wait.
//!
//! Environment variables are read only by [`RuntimeBuilder::from_env`]; see
//! [`env_config`] for the list.

pub mod builder;
pub mod config;
pub mod env_config;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{PoolConfig, RuntimeConfig};
