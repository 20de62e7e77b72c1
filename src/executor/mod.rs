//! Executors and the propagating wrapper around them.
//!
//! The raw executors here know nothing about contexts or jobs; they run
//! boxed closures:
//!
//! - [`ThreadPool`]: min/max pool with idle retirement
//! - [`BoundedExecutor`]: caps parallelism on top of another executor
//! - [`ScheduledExecutor`]: delayed and periodic dispatch onto a backend
//! - [`UiDispatcher`]: one serialized event thread
//!
//! [`Propagating`] decorates any of them. At submission it captures the
//! caller's context and creates a child of the caller's job; on the worker
//! it installs that context, runs the task, resolves the job, and restores
//! whatever the worker had installed before.

pub mod bounded;
pub mod handle;
pub mod pool;
pub mod propagation;
pub mod report;
pub mod scheduled;
pub mod ui;

pub use bounded::BoundedExecutor;
pub use handle::TaskHandle;
pub use pool::{PoolHandle, PoolOptions, ThreadPool};
pub use propagation::{Propagating, PropagationRecord};
pub use report::{FailureReporter, LogReporter, ReporterElement};
pub use scheduled::{PeriodicHandle, ScheduledExecutor, TimerId};
pub use ui::UiDispatcher;

use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};

/// A unit of work handed to an executor.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs closures, eventually, on some thread.
///
/// A runnable that is refused or dropped unrun must be dropped, never
/// leaked: propagated tasks rely on their drop to resolve the job.
pub trait Executor: Send + Sync {
    /// Hands `task` to the executor.
    ///
    /// Returns [`ErrorKind::Rejected`](crate::ErrorKind::Rejected) if the
    /// executor no longer accepts work.
    fn execute(&self, task: Runnable) -> Result<()>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        (**self).execute(task)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, task: Runnable) -> Result<()> {
        (**self).execute(task)
    }
}

/// Runs every task on a fresh OS thread.
#[derive(Debug, Clone)]
pub struct ThreadPerTask {
    name: String,
}

impl ThreadPerTask {
    /// Creates an executor naming its threads `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadPerTask {
    fn default() -> Self {
        Self::new("strand-task")
    }
}

impl Executor for ThreadPerTask {
    fn execute(&self, task: Runnable) -> Result<()> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(task)
            .map(drop)
            .map_err(|e| Error::rejected("failed to spawn thread").with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn thread_per_task_runs_on_named_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadPerTask::new("custom")
            .execute(Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_owned));
            }))
            .expect("spawn");
        assert_eq!(rx.recv().expect("ran").as_deref(), Some("custom"));
    }

    #[test]
    fn arc_executor_delegates() {
        let exec: Arc<dyn Executor> = Arc::new(ThreadPerTask::default());
        let (tx, rx) = mpsc::channel();
        exec.execute(Box::new(move || {
            let _ = tx.send(1);
        }))
        .expect("spawn");
        assert_eq!(rx.recv().ok(), Some(1));
    }
}
