//! Handles to propagated tasks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::job::Job;
use crate::types::{CancelReason, Outcome};

/// Set-once slot the task body writes its result into.
pub(crate) struct ResultSlot<T> {
    value: Mutex<Option<Result<T>>>,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
        })
    }

    /// Stores the body's result. A second store is ignored.
    pub(crate) fn set(&self, result: Result<T>) -> bool {
        let mut value = self.value.lock();
        if value.is_some() {
            return false;
        }
        *value = Some(result);
        true
    }

    pub(crate) fn take(&self) -> Option<Result<T>> {
        self.value.lock().take()
    }
}

/// A handle to a task submitted through a propagating wrapper.
///
/// Joining waits for the task's job, which includes every child the task
/// spawned. A failure anywhere in that subtree takes precedence over the
/// task's own return value.
#[must_use = "dropping the handle detaches the task; it still runs"]
pub struct TaskHandle<T> {
    job: Job,
    slot: Arc<ResultSlot<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(job: Job, slot: Arc<ResultSlot<T>>) -> Self {
        Self { job, slot }
    }

    /// The task's job.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Requests cancellation of the task and its children.
    ///
    /// A task that has not started never runs. A running task observes the
    /// request at its next cancellation check.
    pub fn cancel(&self) {
        self.job.cancel(&CancelReason::user("task handle cancelled"));
    }

    /// Returns true once the task and all of its children are done.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.job.is_terminal()
    }

    /// Waits up to `timeout` for the task to finish. Returns true if it did.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.job.join_timeout(timeout).is_some()
    }

    /// Blocks until the task and its children finish and returns the
    /// task's result.
    pub fn join(self) -> Result<T> {
        let outcome = self.job.join();
        self.resolve(outcome)
    }

    /// Like [`join`](Self::join), failing with
    /// [`ErrorKind::DeadlineExceeded`](crate::ErrorKind::DeadlineExceeded)
    /// if the task is still running after `timeout`. The task is not
    /// cancelled.
    pub fn join_timeout(self, timeout: Duration) -> Result<T> {
        match self.job.join_timeout(timeout) {
            Some(outcome) => self.resolve(outcome),
            None => Err(Error::deadline_exceeded(format!(
                "task not finished after {timeout:?}"
            ))
            .with_job(self.job.id())),
        }
    }

    fn resolve(&self, outcome: Outcome<(), Error>) -> Result<T> {
        match outcome {
            Outcome::Err(err) => Err(err),
            Outcome::Ok(()) => self.slot.take().unwrap_or_else(|| {
                Err(Error::failed("task completed without producing a value").with_job(self.job.id()))
            }),
            Outcome::Cancelled(reason) => self
                .slot
                .take()
                .unwrap_or_else(|| Err(Error::cancelled(&reason).with_job(self.job.id()))),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("job", &self.job)
            .field("finished", &self.is_finished())
            .finish()
    }
}
