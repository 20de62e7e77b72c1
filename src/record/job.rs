//! Job record: the lock-protected state of one node in the job tree.
//!
//! The record is pure bookkeeping. It never takes locks, wakes waiters, or
//! touches other jobs; [`crate::job::Job`] holds it behind a mutex and
//! drives the cross-job effects (cascading cancellation, notifying the
//! parent) from the return values.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind};
use crate::types::{join_outcomes, CancelReason, JobId, Outcome};

/// The state of a job in its lifecycle.
///
/// State machine:
/// ```text
/// Active ──(body done, children done)──────────────────> Completed
///   │
///   ├──cancel()──> Cancelling ──(body done, children done)──> Cancelled
///   │
///   └──child fails──> Cancelling ──(body done, children done)──> Failed
/// ```
///
/// A job that is Cancelling because of a failure drains its children the
/// same way a cancelled one does; the recorded failure decides the final
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Running its body or waiting on children.
    Active,
    /// Cancellation was requested; draining body and children.
    Cancelling,
    /// Terminal: cancelled.
    Cancelled,
    /// Terminal: body and every child completed normally.
    Completed,
    /// Terminal: the body or a non-isolated child failed.
    Failed,
}

impl JobState {
    /// Returns true if the job is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    /// Returns true if children may still be attached.
    #[must_use]
    pub const fn can_adopt(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Where the job's own body is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// Not started. Cancellation in this state means the body never runs.
    Pending,
    /// Executing on some thread.
    Running,
    /// Resolved exactly once.
    Finished,
}

/// What a cancellation request did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// The job was already terminal.
    Ignored,
    /// Cancellation was already requested; the reason may have been
    /// strengthened.
    AlreadyRequested,
    /// First request: the caller must cascade to children and run hooks.
    Requested,
}

/// A failure accepted by [`JobRecord::record_failure`].
#[derive(Debug, Clone)]
pub struct RecordedFailure {
    /// The error as recorded, attributed to the job that raised it.
    pub error: Error,
    /// True if it became the job's first failure.
    pub first: bool,
    /// True if the record now holds finalization until the failure has
    /// been handed to the parent.
    pub held: bool,
}

/// Internal record for a job.
#[derive(Debug)]
pub struct JobRecord<C> {
    /// Unique identifier.
    pub id: JobId,
    state: JobState,
    body: BodyState,
    children: BTreeMap<JobId, C>,
    cancel_reason: Option<CancelReason>,
    failure: Option<Error>,
    // Failures still on their way to the parent. Finalization waits for
    // them so the parent records the failure before it loses the child.
    holds: usize,
    outcome: Option<Outcome<(), Error>>,
}

impl<C> JobRecord<C> {
    /// Creates a new active record with a pending body.
    #[must_use]
    pub const fn new(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Active,
            body: BodyState::Pending,
            children: BTreeMap::new(),
            cancel_reason: None,
            failure: None,
            holds: 0,
            outcome: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    /// Current body state.
    #[must_use]
    pub const fn body(&self) -> BodyState {
        self.body
    }

    /// The cancellation reason, once cancellation was requested.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.cancel_reason.as_ref()
    }

    /// The first recorded failure with later ones attached as suppressed.
    #[must_use]
    pub const fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// The terminal outcome, once terminal.
    #[must_use]
    pub const fn outcome(&self) -> Option<&Outcome<(), Error>> {
        self.outcome.as_ref()
    }

    /// Number of live children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Live children.
    pub fn children(&self) -> impl Iterator<Item = &C> {
        self.children.values()
    }

    /// Attaches a child. Refused (the child is handed back) once the job
    /// has started cancelling or is terminal.
    pub fn add_child(&mut self, id: JobId, child: C) -> Result<(), C> {
        if self.state.can_adopt() {
            self.children.insert(id, child);
            Ok(())
        } else {
            Err(child)
        }
    }

    /// Detaches a terminated child.
    pub fn remove_child(&mut self, id: JobId) -> Option<C> {
        self.children.remove(&id)
    }

    /// Records a cancellation request.
    ///
    /// A pending body is resolved on the spot: it will never run.
    pub fn request_cancel(&mut self, reason: &CancelReason) -> CancelEffect {
        if self.state.is_terminal() {
            return CancelEffect::Ignored;
        }
        if let Some(existing) = &mut self.cancel_reason {
            existing.strengthen(reason);
            return CancelEffect::AlreadyRequested;
        }
        self.cancel_reason = Some(reason.clone());
        self.state = JobState::Cancelling;
        if self.body == BodyState::Pending {
            self.body = BodyState::Finished;
        }
        CancelEffect::Requested
    }

    /// Marks the body as running.
    ///
    /// Fails with a cancellation error if cancellation was requested before
    /// the body could start.
    pub fn start_body(&mut self) -> Result<(), Error> {
        if let Some(reason) = &self.cancel_reason {
            return Err(Error::cancelled(reason).with_job(self.id));
        }
        match self.body {
            BodyState::Pending => {
                self.body = BodyState::Running;
                Ok(())
            }
            BodyState::Running | BodyState::Finished => Err(Error::new(
                ErrorKind::InvalidStateTransition,
            )
            .with_message(format!("body already {:?}", self.body))
            .with_job(self.id)),
        }
    }

    /// Resolves the body. Accepted exactly once.
    ///
    /// A failed body is recorded as with
    /// [`record_failure`](Self::record_failure) and returned; the caller
    /// then cancels the job's children on a first failure and forwards a
    /// held one to the parent.
    pub fn finish_body(
        &mut self,
        outcome: Outcome<(), Error>,
        forward: bool,
    ) -> Result<Option<RecordedFailure>, Error> {
        if self.body == BodyState::Finished || self.state.is_terminal() {
            return Err(Error::double_completion("job body resolved twice").with_job(self.id));
        }
        self.body = BodyState::Finished;
        match outcome {
            Outcome::Ok(()) => Ok(None),
            Outcome::Cancelled(reason) => {
                // The body observed cancellation through an ancestor before
                // the cascade reached this record.
                match &mut self.cancel_reason {
                    Some(existing) => {
                        existing.strengthen(&reason);
                    }
                    None => {
                        self.cancel_reason = Some(reason);
                        self.state = JobState::Cancelling;
                    }
                }
                Ok(None)
            }
            Outcome::Err(err) => Ok(self.record_failure(err, forward)),
        }
    }

    /// Records a failure. The first one wins; later ones are attached to
    /// it as suppressed causes. Ignored once the job is terminal.
    ///
    /// With `forward`, finalization is held until
    /// [`release_hold`](Self::release_hold) is called.
    pub fn record_failure(&mut self, err: Error, forward: bool) -> Option<RecordedFailure> {
        if self.state.is_terminal() {
            return None;
        }
        let err = err.with_job(self.id);
        let first = match &mut self.failure {
            Some(first) => {
                first.add_suppressed(err.clone());
                false
            }
            None => {
                self.failure = Some(err.clone());
                true
            }
        };
        if forward {
            self.holds += 1;
        }
        Some(RecordedFailure {
            error: err,
            first,
            held: forward,
        })
    }

    /// Releases a hold taken by a forwarded failure.
    pub fn release_hold(&mut self) {
        self.holds = self.holds.saturating_sub(1);
    }

    /// Transitions to the terminal state if the body is resolved and no
    /// children remain. Returns the outcome on the transition.
    pub fn try_finalize(&mut self) -> Option<Outcome<(), Error>> {
        if self.state.is_terminal()
            || self.body != BodyState::Finished
            || !self.children.is_empty()
            || self.holds > 0
        {
            return None;
        }
        let failed = self.failure.clone().map_or(Outcome::Ok(()), Outcome::Err);
        let cancelled = self
            .cancel_reason
            .clone()
            .map_or(Outcome::Ok(()), Outcome::Cancelled);
        // A failure outranks a concurrent cancellation.
        let outcome = join_outcomes(failed, cancelled);
        self.state = match &outcome {
            Outcome::Ok(()) => JobState::Completed,
            Outcome::Cancelled(_) => JobState::Cancelled,
            Outcome::Err(_) => JobState::Failed,
        };
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }
}
