//! Error types and error handling strategy.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed; the kind says what happened, the
//!   message says where.
//! - Cooperative cancellation is an error *value* (so `?` can unwind a
//!   task), but it is never treated as a failure: it is not reported, not
//!   logged at error level, and does not fail the parent job.
//! - A job records the first failure it sees; later failures are attached
//!   to it as suppressed causes instead of overwriting it.
//! - Panics in propagated tasks are caught at the task boundary and turned
//!   into [`ErrorKind::Panicked`] failures.
//!
//! # Error Categories
//!
//! - **Cancellation**: a cancellation request was observed
//! - **Failure**: a task returned an error or panicked
//! - **Process**: a backing process died under a pending call
//! - **Executor**: the executor refused the work or a wait timed out
//! - **Internal**: invariant violations such as double completion

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::types::{CancelReason, JobId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Cooperative cancellation was observed.
    Cancelled,

    // === Failure ===
    /// A child job failed and the failure was propagated.
    Failed,
    /// A propagated task panicked.
    Panicked,
    /// User-provided error.
    User,

    // === Process ===
    /// The external process backing a call terminated.
    ProcessTerminated,

    // === Executor ===
    /// A wait did not finish before its deadline.
    DeadlineExceeded,
    /// The executor rejected the submission (shut down or failed to start).
    Rejected,

    // === Internal ===
    /// A job body or promise was resolved a second time.
    DoubleCompletion,
    /// Invalid state transition.
    InvalidStateTransition,
    /// Internal error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Failed | Self::Panicked | Self::User => ErrorCategory::Failure,
            Self::ProcessTerminated => ErrorCategory::Process,
            Self::DeadlineExceeded | Self::Rejected => ErrorCategory::Executor,
            Self::DoubleCompletion | Self::InvalidStateTransition | Self::Internal => {
                ErrorCategory::Internal
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
            Self::User => "user error",
            Self::ProcessTerminated => "process terminated",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Rejected => "rejected",
            Self::DoubleCompletion => "double completion",
            Self::InvalidStateTransition => "invalid state transition",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cooperative cancellation.
    Cancellation,
    /// Task and child failures.
    Failure,
    /// Backing process death.
    Process,
    /// Executor refusal and deadline errors.
    Executor,
    /// Internal invariant violations.
    Internal,
}

/// The main error type.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    cancel_reason: Option<CancelReason>,
    job: Option<JobId>,
    suppressed: Vec<Error>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            cancel_reason: None,
            job: None,
            suppressed: Vec::new(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error represents cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a real failure (anything but
    /// cancellation).
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !self.is_cancelled()
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the cancellation reason for cancellation errors.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.cancel_reason.as_ref()
    }

    /// Returns the job the error was attributed to, if known.
    #[must_use]
    pub const fn job(&self) -> Option<JobId> {
        self.job
    }

    /// Returns causes that arrived after this one and were attached to it.
    #[must_use]
    pub fn suppressed(&self) -> &[Error] {
        &self.suppressed
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attributes the error to a job, unless it already is.
    #[must_use]
    pub fn with_job(mut self, job: JobId) -> Self {
        self.job.get_or_insert(job);
        self
    }

    /// Attaches a later cause to this one.
    pub fn add_suppressed(&mut self, other: Self) {
        self.suppressed.push(other);
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        let mut err = Self::new(ErrorKind::Cancelled).with_message(reason.to_string());
        err.cancel_reason = Some(reason.clone());
        err
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Creates a generic failure with a message.
    #[must_use]
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed).with_message(msg)
    }

    /// Creates a failure from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::new(ErrorKind::Panicked).with_message(panic_message(payload))
    }

    /// Creates the error reported when a backing process died.
    #[must_use]
    pub fn process_terminated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProcessTerminated).with_message(msg)
    }

    /// Creates the error returned when a job or promise is resolved twice.
    #[must_use]
    pub fn double_completion(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::DoubleCompletion).with_message(what)
    }

    /// Creates a rejected-submission error.
    #[must_use]
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected).with_message(msg)
    }

    /// Creates a deadline error.
    #[must_use]
    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded).with_message(msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(job) = self.job {
            write!(f, " [{job}]")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A specialized Result type.
pub type Result<T> = core::result::Result<T, Error>;

/// Extracts a readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
