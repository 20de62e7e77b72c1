//! Context capture at submission and installation at execution.
//!
//! Every hop from a submitting thread to a worker goes through a
//! [`PropagationRecord`]: the captured context and a fresh child job. The
//! record is consumed when it is turned into a runnable; from then on the
//! runnable owns the job and resolves it exactly once, whether it runs,
//! is refused, or is dropped by an executor that never gets to it.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::handle::{ResultSlot, TaskHandle};
use super::report::report_failure;
use super::{Executor, Runnable};
use crate::cx::{ContextCarrier, ContextSet};
use crate::error::{Error, Result};
use crate::job::{CurrentJob, Job};
use crate::promise::Promise;
use crate::tracing_compat::{debug, debug_span, trace};
use crate::types::{CancelReason, Outcome};

/// What a submission captured: the context to install on the worker and
/// the child job the work runs under.
#[derive(Debug, Clone)]
pub struct PropagationRecord {
    context: ContextSet,
    job: Job,
}

impl PropagationRecord {
    /// Captures the calling thread's ambient context.
    #[must_use]
    pub fn capture() -> Self {
        Self::capture_from(&ContextCarrier::current())
    }

    /// Captures an explicit context instead of the ambient one.
    ///
    /// The new job is a child of the set's [`CurrentJob`], or a root when
    /// the set names none.
    #[must_use]
    pub fn capture_from(set: &ContextSet) -> Self {
        let parent = set.get::<CurrentJob>();
        let job = Job::new_child(parent.as_deref().map(CurrentJob::job));
        let context = set.for_child().with(CurrentJob::new(job.clone()));
        Self { context, job }
    }

    /// The child job created for the submission.
    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.job
    }

    /// The context that will be installed on the worker.
    #[must_use]
    pub const fn context(&self) -> &ContextSet {
        &self.context
    }

    pub(crate) fn into_parts(self) -> (ContextSet, Job) {
        (self.context, self.job)
    }

    /// Wraps `task` into a runnable that resolves the job once.
    ///
    /// `deliver` receives the task's result, or a cancellation error if the
    /// task never ran.
    pub(crate) fn into_runnable<T, F, D>(self, task: F, deliver: D) -> Runnable
    where
        T: 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        let Self { context, job } = self;
        let guard = Unstarted::new(job, deliver);
        Box::new(move || {
            let Some((job, deliver)) = guard.disarm() else {
                return;
            };
            if let Err(err) = job.start_body() {
                trace!(job = %job.id(), "task skipped, cancelled before start");
                deliver(Err(err));
                return;
            }
            let result = run_body(&context, &job, task);
            let outcome = body_outcome(&result);
            deliver(result);
            if let Err(late) = job.finish_body(outcome) {
                debug!(job = %job.id(), error = %late, "late task completion ignored");
            }
        })
    }
}

/// Resolves the job (and the waiter) if the runnable is dropped unrun.
struct Unstarted<T, D: FnOnce(Result<T>)> {
    armed: Option<(Job, D)>,
    _result: PhantomData<fn(T)>,
}

impl<T, D: FnOnce(Result<T>)> Unstarted<T, D> {
    const fn new(job: Job, deliver: D) -> Self {
        Self {
            armed: Some((job, deliver)),
            _result: PhantomData,
        }
    }

    fn disarm(mut self) -> Option<(Job, D)> {
        self.armed.take()
    }
}

impl<T, D: FnOnce(Result<T>)> Drop for Unstarted<T, D> {
    fn drop(&mut self) {
        if let Some((job, deliver)) = self.armed.take() {
            debug!(job = %job.id(), "task dropped before running");
            if job.cancel_reason().is_none() {
                job.cancel(&CancelReason::shutdown());
            }
            let reason = job.cancel_reason().unwrap_or_else(CancelReason::shutdown);
            deliver(Err(Error::cancelled(&reason).with_job(job.id())));
        }
    }
}

/// Runs a task body with `context` installed on the current thread.
///
/// Panics become [`ErrorKind::Panicked`](crate::ErrorKind::Panicked)
/// failures. Failures are handed to the context's reporter; cancellation
/// is not.
pub(crate) fn run_body<T>(
    context: &ContextSet,
    job: &Job,
    task: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let result = {
        let _installed = ContextCarrier::install(context.clone());
        let _span = debug_span!("propagated", job = %job.id()).entered();
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(result) => result,
            Err(payload) => Err(Error::panicked(&*payload)),
        }
    };
    match result {
        Err(err) if !err.is_cancelled() => {
            let err = err.with_job(job.id());
            report_failure(context, job.id(), &err);
            Err(err)
        }
        other => other,
    }
}

/// The job-level view of a task result.
pub(crate) fn body_outcome<T>(result: &Result<T>) -> Outcome<(), Error> {
    Outcome::from_result(result.as_ref().map(drop).map_err(Error::clone))
}

/// Decorates an executor so every submission carries the submitter's
/// context and joins the submitter's job tree.
#[derive(Debug, Clone, Default)]
pub struct Propagating<E> {
    executor: E,
}

impl<E> Propagating<E> {
    /// Wraps `executor`.
    pub const fn new(executor: E) -> Self {
        Self { executor }
    }

    /// The wrapped executor.
    pub const fn inner(&self) -> &E {
        &self.executor
    }

    /// Unwraps the executor.
    pub fn into_inner(self) -> E {
        self.executor
    }
}

impl<E: Executor> Propagating<E> {
    /// Submits `task` under the caller's ambient context.
    ///
    /// The task's job is a child of the caller's job, registered before
    /// this returns.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit_record(PropagationRecord::capture(), task)
    }

    /// Submits `task` under an explicit context instead of the ambient one.
    pub fn submit_in<T, F>(&self, context: &ContextSet, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit_record(PropagationRecord::capture_from(context), task)
    }

    /// Fire-and-forget submission. The work is still tracked by the
    /// caller's job; only the result is discarded.
    pub fn execute<F>(&self, task: F) -> Result<Job>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let record = PropagationRecord::capture();
        let job = record.job().clone();
        self.dispatch(record.into_runnable(task, drop), &job)?;
        Ok(job)
    }

    /// Submits `task` and exposes its result as a [`Promise`].
    ///
    /// Callbacks on the promise do not inherit the submitter's context.
    /// Cancelling the promise cancels the task's job.
    pub fn submit_promise<T, F>(&self, task: F) -> Result<Promise<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let record = PropagationRecord::capture();
        let job = record.job().clone();
        let promise = Promise::for_job(job.clone());
        let resolver = promise.clone();
        let runnable = record.into_runnable(task, move |result| {
            let _ = resolver.complete(result);
        });
        self.dispatch(runnable, &job)?;
        Ok(promise)
    }

    pub(crate) fn submit_record<T, F>(
        &self,
        record: PropagationRecord,
        task: F,
    ) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let job = record.job().clone();
        let slot = ResultSlot::new();
        let sink = Arc::clone(&slot);
        let runnable = record.into_runnable(task, move |result| {
            sink.set(result);
        });
        self.dispatch(runnable, &job)?;
        Ok(TaskHandle::new(job, slot))
    }

    fn dispatch(&self, runnable: Runnable, job: &Job) -> Result<()> {
        trace!(job = %job.id(), "task submitted");
        self.executor
            .execute(runnable)
            .map_err(|err| err.with_job(job.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::IdentityTag;
    use crate::error::ErrorKind;
    use crate::executor::ThreadPerTask;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelKind;

    /// Holds runnables until told to run or drop them.
    #[derive(Default)]
    struct Manual(parking_lot::Mutex<Vec<Runnable>>);

    impl Executor for Manual {
        fn execute(&self, task: Runnable) -> Result<()> {
            self.0.lock().push(task);
            Ok(())
        }
    }

    impl Manual {
        fn run_all(&self) {
            let tasks: Vec<_> = self.0.lock().drain(..).collect();
            for t in tasks {
                t();
            }
        }

        fn drop_all(&self) {
            let tasks: Vec<_> = self.0.lock().drain(..).collect();
            drop(tasks);
        }
    }

    struct Refuse;

    impl Executor for Refuse {
        fn execute(&self, _task: Runnable) -> Result<()> {
            Err(Error::rejected("closed"))
        }
    }

    #[test]
    fn capture_links_to_ambient_job() {
        init_test_logging();
        let parent = Job::new_root();
        let tag = Arc::new(IdentityTag::new("p"));
        let set = ContextSet::of(CurrentJob::new(parent.clone())).with_arc(Arc::clone(&tag));
        let record = PropagationRecord::capture_from(&set);
        assert_eq!(record.job().parent(), Some(parent.clone()));
        assert_eq!(parent.child_count(), 1);
        let seen = record.context().get::<IdentityTag>().expect("tag");
        assert!(Arc::ptr_eq(&seen, &tag));
        let current = record.context().get::<CurrentJob>().expect("job");
        assert_eq!(current.job(), record.job());
    }

    #[test]
    fn capture_without_job_creates_root() {
        let record = PropagationRecord::capture_from(&ContextSet::empty());
        assert!(record.job().parent().is_none());
    }

    #[test]
    fn context_installed_and_restored_on_worker() {
        init_test_logging();
        let exec = Propagating::new(Manual::default());
        let tag = Arc::new(IdentityTag::new("submitter"));
        let handle = ContextCarrier::with(ContextSet::empty().with_arc(Arc::clone(&tag)), || {
            exec.submit(|| Ok(ContextCarrier::get::<IdentityTag>()))
        })
        .expect("submit");

        let worker_set = ContextSet::of(IdentityTag::new("worker"));
        let _g = ContextCarrier::install(worker_set.clone());
        exec.inner().run_all();
        assert_eq!(ContextCarrier::current(), worker_set);

        let seen = handle.join().expect("ran").expect("tag");
        assert!(Arc::ptr_eq(&seen, &tag));
    }

    #[test]
    fn dropped_runnable_cancels_job() {
        init_test_logging();
        let exec = Propagating::new(Manual::default());
        let handle = exec.submit(|| Ok(1)).expect("submit");
        exec.inner().drop_all();
        let err = handle.join().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.cancel_reason().map(|r| r.kind()), Some(CancelKind::Shutdown));
    }

    #[test]
    fn rejected_submission_resolves_job() {
        let exec = Propagating::new(Refuse);
        let parent = Job::new_root();
        let err = ContextCarrier::with(ContextSet::of(CurrentJob::new(parent.clone())), || {
            exec.submit(|| Ok(())).unwrap_err()
        });
        assert_eq!(err.kind(), ErrorKind::Rejected);
        parent.complete().expect("complete");
        assert!(parent.join().is_ok());
    }

    #[test]
    fn cancel_before_run_skips_task() {
        let exec = Propagating::new(Manual::default());
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = exec
            .submit(move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .expect("submit");
        handle.cancel();
        exec.inner().run_all();
        assert!(handle.join().unwrap_err().is_cancelled());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn panic_becomes_failure() {
        init_test_logging();
        let exec = Propagating::new(ThreadPerTask::default());
        let handle = exec.submit(|| -> Result<()> { panic!("kaboom") }).expect("submit");
        let err = handle.join().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.message(), Some("kaboom"));
    }

    #[test]
    fn execute_is_tracked_by_parent() {
        let exec = Propagating::new(Manual::default());
        let parent = Job::new_root();
        let job = ContextCarrier::with(ContextSet::of(CurrentJob::new(parent.clone())), || {
            exec.execute(|| Ok(())).expect("execute")
        });
        parent.complete().expect("complete");
        assert!(!parent.is_terminal());
        exec.inner().run_all();
        assert!(job.is_terminal());
        assert!(parent.join().is_ok());
    }

    #[test]
    fn cancelling_promise_cancels_running_task() {
        init_test_logging();
        let exec = Propagating::new(ThreadPerTask::default());
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let promise = exec
            .submit_promise(move || {
                let _ = started_tx.send(());
                let seen = crate::test_utils::wait_until(
                    std::time::Duration::from_secs(5),
                    crate::bridge::is_cancelled,
                );
                flag.store(seen, std::sync::atomic::Ordering::SeqCst);
                crate::bridge::check_cancelled()?;
                Ok(())
            })
            .expect("submit");
        started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("task started");

        assert!(promise.cancel());
        let job = promise.job().expect("submitted promise has a job").clone();
        assert!(job.is_cancelled());
        assert!(job
            .join_timeout(std::time::Duration::from_secs(5))
            .is_some_and(|o| o.is_cancelled()));
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(promise
            .blocking_get(std::time::Duration::from_secs(1))
            .unwrap_err()
            .is_cancelled());
    }

    #[test]
    fn cancelling_promise_before_run_skips_task() {
        let exec = Propagating::new(Manual::default());
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let promise = exec
            .submit_promise(move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(1_u8)
            })
            .expect("submit");
        assert!(promise.cancel());
        exec.inner().run_all();
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(promise.job().is_some_and(Job::is_terminal));
    }

    #[test]
    fn body_outcome_classifies() {
        assert!(body_outcome(&Ok::<_, Error>(1)).is_ok());
        assert!(body_outcome::<()>(&Err(Error::cancelled(&CancelReason::timeout()))).is_cancelled());
        assert!(body_outcome::<()>(&Err(Error::user("x"))).is_err());
    }
}
