//! The caller-facing handle of an open scope.
//!
//! A [`Scope`] is handed to the body of [`open_scope`](crate::open_scope).
//! It owns the scope's job and the context the body runs under; work
//! launched through it becomes a child of that job no matter which thread
//! the launch happens on.

use core::fmt;

use super::element::ContextElement;
use super::set::ContextSet;
use crate::error::Result;
use crate::executor::{Executor, Propagating, TaskHandle, ThreadPerTask};
use crate::job::Job;
use crate::types::CancelReason;

/// Handle to one open scope.
pub struct Scope {
    job: Job,
    context: ContextSet,
}

impl Scope {
    pub(crate) const fn new(job: Job, context: ContextSet) -> Self {
        Self { job, context }
    }

    /// The scope's job.
    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.job
    }

    /// The context the scope body runs under, including the scope's job.
    #[must_use]
    pub const fn context(&self) -> &ContextSet {
        &self.context
    }

    /// Cancels the scope's job and everything launched in it.
    pub fn cancel(&self) {
        self.job.cancel(&CancelReason::user("scope cancelled"));
    }

    /// Cancels with an explicit reason.
    pub fn cancel_with(&self, reason: &CancelReason) {
        self.job.cancel(reason);
    }

    /// Returns true once the scope or an enclosing job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled()
    }

    /// Cooperative cancellation check for the scope body.
    pub fn check_cancelled(&self) -> Result<()> {
        self.job.check_cancelled()
    }

    /// Runs `task` on a fresh thread as a child of the scope.
    pub fn launch<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Propagating::new(ThreadPerTask::default()).submit_in(&self.context, task)
    }

    /// Like [`launch`](Self::launch), with `element` overriding the
    /// scope's context for this child.
    pub fn launch_with<E, T, F>(&self, element: E, task: F) -> Result<TaskHandle<T>>
    where
        E: ContextElement,
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Propagating::new(ThreadPerTask::default()).submit_in(&self.context.with(element), task)
    }

    /// Runs `task` on `executor` as a child of the scope.
    pub fn launch_on<E, T, F>(&self, executor: &Propagating<E>, task: F) -> Result<TaskHandle<T>>
    where
        E: Executor,
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        executor.submit_in(&self.context, task)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("job", &self.job.id())
            .field("elements", &self.context.len())
            .finish()
    }
}
