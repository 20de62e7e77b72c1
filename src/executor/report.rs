//! Reporting of uncaught task failures.
//!
//! A failure that escapes a propagated task is recorded on its job (and
//! from there fails the parent) and is also handed to the reporter found
//! in the task's context. Cooperative cancellation is never reported.

use std::fmt;
use std::sync::Arc;

use crate::cx::{ContextElement, ContextSet};
use crate::error::Error;
use crate::tracing_compat::error;
use crate::types::JobId;

/// Receives failures that escaped propagated tasks.
pub trait FailureReporter: Send + Sync {
    /// Called once per failed task body, on the thread that ran it.
    fn report(&self, job: JobId, error: &Error);
}

/// The default reporter: logs at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, job: JobId, err: &Error) {
        error!(job = %job, error = %err, kind = %err.kind(), "uncaught failure in propagated task");
    }
}

/// Context element carrying the reporter for work submitted under it.
#[derive(Clone)]
pub struct ReporterElement(Arc<dyn FailureReporter>);

impl ReporterElement {
    /// Wraps a reporter.
    pub fn new(reporter: impl FailureReporter + 'static) -> Self {
        Self(Arc::new(reporter))
    }

    /// The wrapped reporter.
    #[must_use]
    pub fn reporter(&self) -> &dyn FailureReporter {
        &*self.0
    }
}

impl fmt::Debug for ReporterElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReporterElement")
    }
}

impl ContextElement for ReporterElement {}

/// Hands a failure to the reporter in `context`, falling back to
/// [`LogReporter`]. Cancellation errors are ignored.
pub(crate) fn report_failure(context: &ContextSet, job: JobId, err: &Error) {
    if err.is_cancelled() {
        return;
    }
    match context.get::<ReporterElement>() {
        Some(element) => element.reporter().report(job, err),
        None => LogReporter.report(job, err),
    }
}
