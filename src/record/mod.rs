//! Internal records for runtime entities.
//!
//! Records are pure state machines. The shared handles built on them own
//! locking and every effect that crosses between jobs.

pub mod job;

pub use job::{BodyState, CancelEffect, JobRecord, JobState, RecordedFailure};
