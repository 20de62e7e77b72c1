//! The job tree.
//!
//! A [`Job`] is a cheap, cloneable handle to one node. Parents own their
//! live children (strong references in the record's child map); a child
//! reaches its parent through a weak back-reference used only for
//! cancellation checks and for reporting termination upward.
//!
//! # Locking
//!
//! Every job has its own mutex. No code path holds two job locks at once:
//! cascading cancellation walks the tree with an explicit worklist, and
//! termination climbs to the parent one lock at a time. Hooks run with no
//! lock held.
//!
//! # Ordering
//!
//! A child is registered in its parent's record before `new_child`
//! returns, so the parent can never observe zero children while a task it
//! spawned has yet to start. A failure is recorded in the parent as soon
//! as it is recorded in the child, and the child holds off its own
//! termination until then, so the parent sees failures in the order they
//! happened and never finishes before learning of one.

mod current;

pub use current::CurrentJob;

use core::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::{panic_message, Error, Result};
use crate::record::{BodyState, CancelEffect, JobRecord, JobState, RecordedFailure};
use crate::tracing_compat::{debug, error, trace};
use crate::types::{CancelReason, JobId, Outcome};

type CancelHook = Box<dyn FnOnce(&CancelReason) + Send>;
type CompletionHook = Box<dyn FnOnce(&Outcome<(), Error>) + Send>;

struct Shared {
    record: JobRecord<Job>,
    on_cancel: SmallVec<[CancelHook; 1]>,
    on_complete: SmallVec<[CompletionHook; 2]>,
}

struct JobInner {
    id: JobId,
    parent: Option<Weak<JobInner>>,
    isolated: bool,
    // Mirrors `record.cancel_reason().is_some()` for lock-free checks.
    cancel_flag: AtomicBool,
    shared: Mutex<Shared>,
    done: Condvar,
}

/// A node in the cancellation and completion tree.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    fn alloc(parent: Option<&Self>, isolated: bool) -> Self {
        let id = JobId::next();
        Self {
            inner: Arc::new(JobInner {
                id,
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                isolated,
                cancel_flag: AtomicBool::new(false),
                shared: Mutex::new(Shared {
                    record: JobRecord::new(id),
                    on_cancel: SmallVec::new(),
                    on_complete: SmallVec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Creates a job with no parent.
    #[must_use]
    pub fn new_root() -> Self {
        let job = Self::alloc(None, false);
        trace!(job = %job.id(), "root job created");
        job
    }

    /// Creates a child of `parent`, or a root when `parent` is `None`.
    ///
    /// A child of a job that is already cancelling or terminal is created
    /// cancelled: its body will never start.
    #[must_use]
    pub fn new_child(parent: Option<&Self>) -> Self {
        match parent {
            Some(parent) => Self::child_of(parent, false),
            None => Self::new_root(),
        }
    }

    /// Creates a child whose failure is not propagated to `parent`.
    ///
    /// Cancellation still flows down into an isolated child, and the parent
    /// still waits for it.
    #[must_use]
    pub fn isolated_child(parent: &Self) -> Self {
        Self::child_of(parent, true)
    }

    fn child_of(parent: &Self, isolated: bool) -> Self {
        let child = Self::alloc(Some(parent), isolated);
        let adopted = parent
            .inner
            .shared
            .lock()
            .record
            .add_child(child.id(), child.clone())
            .is_ok();
        if adopted {
            trace!(job = %child.id(), parent = %parent.id(), isolated, "child job created");
        } else {
            debug!(
                job = %child.id(),
                parent = %parent.id(),
                "parent no longer accepts children, child created cancelled"
            );
            child.cancel(&CancelReason::parent_cancelled());
        }
        child
    }

    /// Returns the job's id.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Returns the parent, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Returns true if failures of this job stay out of its parent.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    /// Number of ancestors still reachable.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(job) = cursor {
            depth += 1;
            cursor = job.parent();
        }
        depth
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.inner.shared.lock().record.state()
    }

    /// Returns true once the job and all of its descendants are done.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The cancellation reason, if cancellation was requested on this job.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.shared.lock().record.cancel_reason().cloned()
    }

    /// The first failure, with later ones attached as suppressed.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.inner.shared.lock().record.failure().cloned()
    }

    /// The terminal outcome, once terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<(), Error>> {
        self.inner.shared.lock().record.outcome().cloned()
    }

    /// Snapshot of the live children.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner.shared.lock().record.children().cloned().collect()
    }

    /// Number of live children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.shared.lock().record.child_count()
    }

    /// Returns true if this job or any ancestor has been asked to cancel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancel_flag.load(Ordering::Acquire) {
            return true;
        }
        let mut cursor = self.inner.parent.as_ref().and_then(Weak::upgrade);
        while let Some(node) = cursor {
            if node.cancel_flag.load(Ordering::Acquire) {
                return true;
            }
            cursor = node.parent.as_ref().and_then(Weak::upgrade);
        }
        false
    }

    /// Cooperative cancellation check.
    ///
    /// Returns a cancellation error if this job or any ancestor has been
    /// asked to cancel. Running code calls this at the points where it can
    /// stop; nothing interrupts code that never checks.
    pub fn check_cancelled(&self) -> Result<()> {
        if !self.is_cancelled() {
            return Ok(());
        }
        let reason = self
            .cancel_reason()
            .unwrap_or_else(CancelReason::parent_cancelled);
        Err(Error::cancelled(&reason).with_job(self.id()))
    }

    /// Requests cancellation of this job and, transitively, of every
    /// current and future child. Idempotent.
    ///
    /// A job without children whose body is not running becomes Cancelled
    /// immediately; otherwise it is Cancelling until body and children
    /// have drained.
    pub fn cancel(&self, reason: &CancelReason) {
        let mut work: Vec<(Self, CancelReason)> = vec![(self.clone(), reason.clone())];
        while let Some((job, reason)) = work.pop() {
            let (hooks, children) = {
                let mut shared = job.inner.shared.lock();
                if shared.record.request_cancel(&reason) != CancelEffect::Requested {
                    continue;
                }
                job.inner.cancel_flag.store(true, Ordering::Release);
                let hooks = std::mem::take(&mut shared.on_cancel);
                let children: Vec<Self> = shared.record.children().cloned().collect();
                (hooks, children)
            };
            debug!(job = %job.id(), reason = %reason, children = children.len(), "job cancel requested");
            for hook in hooks {
                run_hook(job.id(), "cancel", || hook(&reason));
            }
            let inherited = CancelReason::parent_cancelled();
            work.extend(children.into_iter().map(|c| (c, inherited.clone())));
            job.try_finalize();
        }
    }

    /// Marks the body as running. Refused with a cancellation error if
    /// cancellation was already requested.
    pub fn start_body(&self) -> Result<()> {
        self.inner.shared.lock().record.start_body()
    }

    /// Returns true while the body is executing.
    #[must_use]
    pub fn is_body_running(&self) -> bool {
        self.inner.shared.lock().record.body() == BodyState::Running
    }

    /// Resolves the body. Accepted exactly once; a second resolution
    /// returns [`ErrorKind::DoubleCompletion`](crate::ErrorKind::DoubleCompletion)
    /// and changes nothing.
    ///
    /// A failed body cancels the job's children.
    pub fn finish_body(&self, outcome: Outcome<(), Error>) -> Result<()> {
        let forward = self.forwards_failures();
        let (failure, observed) = {
            let mut shared = self.inner.shared.lock();
            let requested = shared.record.cancel_reason().is_some();
            let failure = shared.record.finish_body(outcome, forward)?;
            // The body saw an ancestor's cancellation before the cascade
            // reached this job.
            let observed = match shared.record.cancel_reason().cloned() {
                Some(reason) if !requested => {
                    self.inner.cancel_flag.store(true, Ordering::Release);
                    let hooks = std::mem::take(&mut shared.on_cancel);
                    let children: Vec<Self> = shared.record.children().cloned().collect();
                    Some((reason, hooks, children))
                }
                _ => None,
            };
            (failure, observed)
        };
        if let Some((reason, hooks, children)) = observed {
            for hook in hooks {
                run_hook(self.id(), "cancel", || hook(&reason));
            }
            let inherited = CancelReason::parent_cancelled();
            for child in children {
                child.cancel(&inherited);
            }
        }
        if let Some(failure) = failure {
            self.propagate_failure(failure);
        }
        self.try_finalize();
        Ok(())
    }

    /// Completes a body-less job normally. The job still waits for its
    /// children.
    ///
    /// Returns `DoubleCompletion` if the body was already resolved,
    /// including by a cancellation that arrived before it started.
    pub fn complete(&self) -> Result<()> {
        self.finish_body(Outcome::Ok(()))
    }

    /// Resolves a running body as failed without waiting for the thread
    /// running it. Returns false if the body had already been resolved.
    ///
    /// The real completion that arrives later is discarded.
    pub fn abandon_body(&self, err: Error) -> bool {
        match self.finish_body(Outcome::Err(err)) {
            Ok(()) => true,
            Err(late) => {
                debug!(job = %self.id(), error = %late, "abandon after body resolution ignored");
                false
            }
        }
    }

    /// Registers a hook run once when cancellation is first requested.
    ///
    /// Runs immediately if cancellation was already requested. Dropped
    /// unrun if the job terminates without being cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce(&CancelReason) + Send + 'static) {
        let mut shared = self.inner.shared.lock();
        if let Some(reason) = shared.record.cancel_reason().cloned() {
            drop(shared);
            run_hook(self.id(), "cancel", || hook(&reason));
        } else if !shared.record.state().is_terminal() {
            shared.on_cancel.push(Box::new(hook));
        }
    }

    /// Registers a hook run exactly once with the terminal outcome.
    ///
    /// Runs immediately if the job is already terminal.
    pub fn on_completion(&self, hook: impl FnOnce(&Outcome<(), Error>) + Send + 'static) {
        let mut shared = self.inner.shared.lock();
        if let Some(outcome) = shared.record.outcome().cloned() {
            drop(shared);
            run_hook(self.id(), "completion", || hook(&outcome));
        } else {
            shared.on_complete.push(Box::new(hook));
        }
    }

    /// Blocks until the job and all of its descendants are terminal.
    pub fn join(&self) -> Outcome<(), Error> {
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = shared.record.outcome() {
                return outcome.clone();
            }
            self.inner.done.wait(&mut shared);
        }
    }

    /// Like [`join`](Self::join), giving up after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Outcome<(), Error>> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = shared.record.outcome() {
                return Some(outcome.clone());
            }
            if self.inner.done.wait_until(&mut shared, deadline).timed_out() {
                return shared.record.outcome().cloned();
            }
        }
    }

    /// Returns true if both handles refer to the same job.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn forwards_failures(&self) -> bool {
        !self.inner.isolated && self.inner.parent.is_some()
    }

    /// Acts on a failure just recorded on this job, then climbs.
    ///
    /// A first failure cancels the job's children. A held failure is
    /// recorded in the parent while this job cannot finalize, so the parent
    /// learns of it when it happens rather than when this job's subtree
    /// has drained, and siblings are cancelled right away.
    fn propagate_failure(&self, recorded: RecordedFailure) {
        if recorded.first {
            self.cancel(&CancelReason::sibling_failed());
        }
        let mut current = self.clone();
        let mut recorded = recorded;
        while recorded.held {
            let next = current.parent().and_then(|parent| {
                let forward = parent.forwards_failures();
                let accepted = parent
                    .inner
                    .shared
                    .lock()
                    .record
                    .record_failure(recorded.error.clone(), forward);
                accepted.map(|accepted| (parent, accepted))
            });
            if let Some((parent, accepted)) = &next {
                if accepted.first {
                    debug!(job = %parent.id(), child = %current.id(), "child failed, cancelling siblings");
                    parent.cancel(&CancelReason::sibling_failed());
                }
            }
            current.inner.shared.lock().record.release_hold();
            current.try_finalize();
            let Some((parent, accepted)) = next else {
                return;
            };
            current = parent;
            recorded = accepted;
        }
    }

    /// Finishes this job if it can, then climbs to each parent whose last
    /// child just terminated.
    fn try_finalize(&self) {
        let mut current = self.clone();
        loop {
            let (outcome, hooks) = {
                let mut shared = current.inner.shared.lock();
                let Some(outcome) = shared.record.try_finalize() else {
                    return;
                };
                shared.on_cancel.clear();
                (outcome, std::mem::take(&mut shared.on_complete))
            };
            current.inner.done.notify_all();
            trace!(job = %current.id(), outcome = outcome_label(&outcome), "job terminal");
            for hook in hooks {
                run_hook(current.id(), "completion", || hook(&outcome));
            }

            let Some(parent) = current.parent() else {
                return;
            };
            // Failures reached the parent when they were recorded.
            parent.inner.shared.lock().record.remove_child(current.id());
            current = parent;
        }
    }
}

fn run_hook(job: JobId, kind: &'static str, hook: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
        error!(job = %job, kind, panic = %panic_message(&*payload), "job hook panicked");
    }
}

const fn outcome_label(outcome: &Outcome<(), Error>) -> &'static str {
    match outcome {
        Outcome::Ok(()) => "completed",
        Outcome::Cancelled(_) => "cancelled",
        Outcome::Err(_) => "failed",
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Job {}

impl core::hash::Hash for Job {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("cancel_requested", &self.inner.cancel_flag.load(Ordering::Relaxed))
            .field("isolated", &self.inner.isolated)
            .finish()
    }
}
