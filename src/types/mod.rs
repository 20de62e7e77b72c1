//! Core value types.
//!
//! - [`id`]: Job identifiers
//! - [`outcome`]: Three-valued outcome type with severity lattice
//! - [`cancel`]: Cancellation reason and kind types
//! - [`builder`]: Builder error types

pub mod builder;
pub mod cancel;
pub mod id;
pub mod outcome;

pub use builder::{BuildError, BuildResult};
pub use cancel::{CancelKind, CancelReason};
pub use id::JobId;
pub use outcome::{join_outcomes, Outcome};
