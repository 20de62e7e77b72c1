//! Three-valued outcome type with severity lattice.
//!
//! The outcome of a job or task body is one of:
//!
//! - `Ok(T)`: Success with value
//! - `Cancelled(CancelReason)`: Cooperative cancellation was observed
//! - `Err(E)`: A real failure (returned error or caught panic)
//!
//! These form a severity lattice: `Ok < Cancelled < Err`.
//!
//! A failure ranks above cancellation: when a job is cancelled and one of
//! its children also fails, the failure is what a waiter gets to see.

use super::cancel::CancelReason;
use crate::error::Error;
use core::fmt;

/// The three-valued outcome of a unit of work.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
    /// Success with a value.
    Ok(T),
    /// The work observed cancellation and stopped.
    Cancelled(CancelReason),
    /// The work failed.
    Err(E),
}

impl<T, E> Outcome<T, E> {
    /// Returns the severity level of this outcome (0 = Ok, 2 = Err).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Cancelled(_) => 1,
            Self::Err(_) => 2,
        }
    }

    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the error, if this is a failure.
    #[must_use]
    pub const fn err(&self) -> Option<&E> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the cancellation reason, if this outcome is `Cancelled`.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(r) => Some(r),
            _ => None,
        }
    }

}

impl<T> Outcome<T, Error> {
    /// Classifies a task result: cancellation errors become `Cancelled`,
    /// every other error is a failure.
    #[must_use]
    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) if e.is_cancelled() => {
                Self::Cancelled(e.cancel_reason().cloned().unwrap_or_default())
            }
            Err(e) => Self::Err(e),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}

impl<T: fmt::Display, E: fmt::Display> fmt::Display for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(v) => write!(f, "ok({v})"),
            Self::Cancelled(r) => write!(f, "cancelled({r})"),
            Self::Err(e) => write!(f, "failed({e})"),
        }
    }
}

/// Compares two outcomes by severity and returns the worse one.
///
/// On equal severity the first argument wins, which keeps "first failure
/// wins" when folding outcomes in chronological order.
pub fn join_outcomes<T, E>(a: Outcome<T, E>, b: Outcome<T, E>) -> Outcome<T, E> {
    if a.severity() >= b.severity() {
        a
    } else {
        b
    }
}
