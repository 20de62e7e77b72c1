//! Strand: context propagation and structured cancellation for blocking
//! executors.
//!
//! # Overview
//!
//! Work handed to a thread pool, a timer, or a UI thread normally loses
//! track of where it came from: the caller's identity, diagnostic labels,
//! and above all the caller's cancellation. Strand carries that ambient
//! context across every submission boundary and links each submitted task
//! into a job tree, so that cancelling a parent reaches every descendant and
//! a parent does not finish until its children have.
//!
//! # Core Guarantees
//!
//! - **Context follows work**: a task runs under exactly the context its
//!   submitter had, minus thread-local elements, and the worker's previous
//!   context is restored afterwards
//! - **No orphan jobs**: a job reaches a terminal state only after every
//!   child has
//! - **Cancellation cascades**: cancelling a job reaches all descendants
//!   through one tree walk; observing it is cooperative
//! - **First failure wins**: the first failing child fails its parent and
//!   cancels its siblings; later failures are attached as suppressed
//! - **Dropped work resolves**: a task an executor drops without running
//!   resolves as cancelled rather than hanging its parent
//!
//! # Module Structure
//!
//! - [`cx`]: Context elements, sets, the per-thread carrier, and scopes
//! - [`job`]: The job tree and its cancellation protocol
//! - [`record`]: Pure state machines behind each job
//! - [`executor`]: Raw executors and the [`Propagating`] decorator
//! - [`promise`]: Completion handles whose callbacks run context-free
//! - [`bridge`]: [`open_scope`] and other blocking entry points
//! - [`client`]: Serialized, process-aware client calls
//! - [`runtime`]: Configuration and the assembled [`Runtime`]
//! - [`types`]: Identifiers, cancellation reasons, outcomes
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use strand::cx::{ContextCarrier, IdentityTag};
//! use strand::executor::{Propagating, ThreadPool};
//! use strand::open_scope;
//!
//! let pool = ThreadPool::new(1, 4);
//! let exec = Propagating::new(pool.handle());
//!
//! let who = ContextCarrier::with_element(IdentityTag::new("alice"), || {
//!     open_scope(|_scope| {
//!         let task = exec.submit(|| {
//!             Ok(ContextCarrier::get::<IdentityTag>().map(|t| t.id().to_owned()))
//!         })?;
//!         task.join()
//!     })
//! })
//! .expect("scope");
//! assert_eq!(who.as_deref(), Some("alice"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod bridge;
pub mod client;
pub mod cx;
pub mod error;
pub mod executor;
pub mod job;
pub mod promise;
pub mod record;
pub mod runtime;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-exports for convenient access to core types
pub use bridge::{
    blocking_context, check_cancelled, current_job, detached, is_cancelled, open_scope,
    open_scope_with, ScopeOptions,
};
pub use client::SerialClient;
pub use cx::{ChildPolicy, ContextCarrier, ContextElement, ContextSet, Scope};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use executor::{Executor, PeriodicHandle, Propagating, PropagationRecord, TaskHandle};
pub use job::{CurrentJob, Job};
pub use promise::Promise;
pub use record::JobState;
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
pub use types::{BuildError, CancelKind, CancelReason, JobId, Outcome};
