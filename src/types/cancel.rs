//! Why a job was asked to stop.
//!
//! Cancellation is cooperative: a request is recorded on a job and cascades
//! to its children, and running code observes it the next time it calls a
//! cancellation check. These types describe why a request was made.

use core::fmt;

/// What triggered a cancellation request.
///
/// Declared from weakest to strongest; [`CancelReason::strengthen`] relies
/// on the derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Requested by application code through a scope or handle.
    User,
    /// Cancellation due to a scope deadline.
    Timeout,
    /// A UI-thread task whose relevance condition no longer held at dispatch.
    Expired,
    /// A sibling job failed and the parent cancelled its remaining children.
    FailFast,
    /// The parent job was cancelled.
    ParentCancelled,
    /// The executor that owned the work shut down before running it.
    Shutdown,
}

impl CancelKind {
    /// Numeric rank of the kind; a higher rank wins when two requests meet.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Timeout => 1,
            Self::Expired => 2,
            Self::FailFast => 3,
            Self::ParentCancelled => 4,
            Self::Shutdown => 5,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::Expired => write!(f, "expired"),
            Self::FailFast => write!(f, "fail-fast"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A cancellation request as recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// What triggered the request.
    pub kind: CancelKind,
    /// Static detail text, if any.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// A reason of `kind` with no detail.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// An application request carrying `message`.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// A scope deadline passed.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// A UI task's condition no longer held when it was dispatched.
    #[must_use]
    pub const fn expired() -> Self {
        Self::new(CancelKind::Expired)
    }

    /// A sibling failed.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::FailFast)
    }

    /// Inherited from a cancelled ancestor.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// The owning executor stopped.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Merges a later request into this one.
    ///
    /// The stronger kind wins. Between equal kinds the smaller message is
    /// kept so the result does not depend on arrival order. Returns `true`
    /// if `self` changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind > self.kind {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }

        if other.kind < self.kind {
            return false;
        }

        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }

    /// The trigger.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}
