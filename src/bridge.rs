//! Blocking entry points into structured work.
//!
//! [`open_scope`] runs a body on the calling thread under a fresh job and
//! then blocks until everything launched inside it has finished. It is the
//! only place a calling thread waits on the job tree.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::cx::{ContextCarrier, ContextSet, Scope};
use crate::error::{Error, Result};
use crate::executor::propagation::body_outcome;
use crate::job::{CurrentJob, Job};
use crate::tracing_compat::{debug, debug_span, warn};
use crate::types::{CancelReason, Outcome};

/// Options for [`open_scope_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Upper bound on the wait for children after the body returns.
    /// `None` waits for as long as it takes.
    pub deadline: Option<Duration>,
}

impl ScopeOptions {
    /// Options with no deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Bounds the wait for children.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs `body` under a new scope and waits for all of its children.
///
/// The scope's job is a child of the caller's ambient job (or a root).
/// After the body returns the call blocks until every task launched in
/// the scope, transitively, has finished.
///
/// Returns the body's value unless the body or any child failed, in which
/// case the first failure is returned with later ones attached as
/// suppressed. A scope that was cancelled but did not fail returns the
/// body's value. A panic in the body cancels the children, waits for them,
/// and is then resumed.
///
/// # Examples
///
/// ```
/// use strand::executor::{Propagating, ThreadPerTask};
/// use strand::open_scope;
///
/// let exec = Propagating::new(ThreadPerTask::default());
/// let total = open_scope(|_scope| {
///     let a = exec.submit(|| Ok(20))?;
///     let b = exec.submit(|| Ok(22))?;
///     Ok(a.join()? + b.join()?)
/// })
/// .expect("scope");
/// assert_eq!(total, 42);
/// ```
pub fn open_scope<T>(body: impl FnOnce(&Scope) -> Result<T>) -> Result<T> {
    open_scope_with(ScopeOptions::default(), body)
}

/// [`open_scope`] with options.
///
/// If children are still running when the deadline passes, the scope is
/// cancelled with [`CancelKind::Timeout`](crate::CancelKind::Timeout) and
/// [`ErrorKind::DeadlineExceeded`](crate::ErrorKind::DeadlineExceeded) is
/// returned without waiting further.
pub fn open_scope_with<T>(options: ScopeOptions, body: impl FnOnce(&Scope) -> Result<T>) -> Result<T> {
    let ambient = ContextCarrier::current();
    let job = match ambient.get::<CurrentJob>() {
        Some(parent) => Job::isolated_child(parent.job()),
        None => Job::new_root(),
    };
    let scope = Scope::new(job.clone(), ambient.with(CurrentJob::new(job.clone())));
    let _span = debug_span!("scope", job = %job.id()).entered();

    job.start_body()?;
    let result = {
        let _installed = ContextCarrier::install(scope.context().clone());
        catch_unwind(AssertUnwindSafe(|| body(&scope)))
    };

    match result {
        Err(payload) => {
            let err = Error::panicked(&*payload).with_job(job.id());
            debug!(job = %job.id(), error = %err, "scope body panicked, draining children");
            if let Err(late) = job.finish_body(Outcome::Err(err)) {
                warn!(job = %job.id(), error = %late, "scope body resolved twice");
            }
            let _ = wait(&job, options.deadline);
            resume_unwind(payload)
        }
        Ok(value) => {
            if let Err(late) = job.finish_body(body_outcome(&value)) {
                warn!(job = %job.id(), error = %late, "scope body resolved twice");
            }
            match wait(&job, options.deadline) {
                Some(Outcome::Err(err)) => Err(err),
                Some(Outcome::Ok(()) | Outcome::Cancelled(_)) => value,
                None => {
                    job.cancel(&CancelReason::timeout());
                    Err(Error::deadline_exceeded(format!(
                        "scope children still running after {:?}",
                        options.deadline.unwrap_or_default()
                    ))
                    .with_job(job.id()))
                }
            }
        }
    }
}

fn wait(job: &Job, deadline: Option<Duration>) -> Option<Outcome<(), Error>> {
    match deadline {
        Some(limit) => job.join_timeout(limit),
        None => Some(job.join()),
    }
}

/// Runs a blocking `body` with `set` installed as the ambient context.
///
/// The explicit form of context passing: whatever `body` submits captures
/// `set`, not the caller's previous context.
pub fn blocking_context<R>(set: ContextSet, body: impl FnOnce() -> R) -> R {
    ContextCarrier::with(set, body)
}

/// Runs `body` with the ambient context minus the current job.
///
/// Work submitted inside becomes root jobs: nothing waits for it, and
/// fire-and-forget chains do not deepen the tree.
pub fn detached<R>(body: impl FnOnce() -> R) -> R {
    ContextCarrier::with(ContextCarrier::current().without::<CurrentJob>(), body)
}

/// The ambient job of the calling thread.
#[must_use]
pub fn current_job() -> Option<Job> {
    Job::current()
}

/// Cooperative cancellation check against the ambient job. Succeeds when
/// no job is installed.
pub fn check_cancelled() -> Result<()> {
    current_job().map_or(Ok(()), |job| job.check_cancelled())
}

/// Returns true if the ambient job or one of its ancestors is cancelled.
#[must_use]
pub fn is_cancelled() -> bool {
    current_job().is_some_and(|job| job.is_cancelled())
}
