//! Ambient context: elements, sets, the per-thread carrier, and scopes.
//!
//! - [`ContextElement`]: one typed, immutable piece of ambient data
//! - [`ContextSet`]: an immutable map from element type to element
//! - [`ContextCarrier`]: the calling thread's installed set
//! - [`Scope`]: handle to an open scope, used to launch child work
//!
//! Context is read at the submission boundary and installed on the worker;
//! business logic in between does not need to thread it through.

pub mod carrier;
pub mod element;
pub mod scope;
pub mod set;

pub use carrier::{ContextCarrier, InstallGuard};
pub use element::{ChildPolicy, ContextElement, DiagnosticTag, ElementKey, IdentityTag, ModalityMarker};
pub use scope::Scope;
pub use set::ContextSet;
