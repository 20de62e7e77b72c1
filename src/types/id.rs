//! Identifier types for jobs.
//!
//! Job identifiers are process-unique and allocated from a single monotonic
//! counter, so comparing two ids also tells which job was created first.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a job in the cancellation tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocates the next job identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a job ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = JobId::next();
        let b = JobId::next();
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_debug() {
        let id = JobId::new_for_test(7);
        assert_eq!(format!("{id}"), "J7");
        assert_eq!(format!("{id:?}"), "JobId(7)");
    }
}
