use super::Job;
use crate::cx::{ContextCarrier, ContextElement};

/// Context element naming the job that ambient work belongs to.
///
/// Wrappers read it at submission time to pick the parent of the child job
/// they create, and install the child's own `CurrentJob` on the worker.
#[derive(Debug, Clone)]
pub struct CurrentJob(Job);

impl CurrentJob {
    /// Wraps a job.
    #[must_use]
    pub const fn new(job: Job) -> Self {
        Self(job)
    }

    /// The wrapped job.
    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.0
    }
}

impl ContextElement for CurrentJob {}

impl Job {
    /// The ambient job of the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        ContextCarrier::get::<CurrentJob>().map(|current| current.job().clone())
    }
}
