//! Context elements: typed, immutable units of ambient data.
//!
//! An element is identified by its Rust type. A [`ContextSet`] holds at most
//! one element per type, and elements are always shared by `Arc`, so the
//! instance a submitter installed is the very instance a task observes on
//! another thread.
//!
//! [`ContextSet`]: super::ContextSet

use core::any::{type_name, Any, TypeId};
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// How an element travels into work spawned from the thread it is
/// installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildPolicy {
    /// The same instance is captured at submission and installed for the
    /// child.
    #[default]
    Inherit,
    /// The element stays on the installing thread and is dropped from the
    /// set captured for children.
    ThreadLocal,
}

/// A typed, immutable piece of ambient data.
///
/// Implementors must be cheap to share; the set stores them behind `Arc`
/// and never copies them.
pub trait ContextElement: Any + Send + Sync + fmt::Debug {
    /// Human-readable element name used in diagnostics.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Whether this element is propagated into spawned children.
    fn child_policy(&self) -> ChildPolicy {
        ChildPolicy::Inherit
    }
}

/// The key an element is stored under: its concrete type.
#[derive(Clone, Copy)]
pub struct ElementKey {
    type_id: TypeId,
    name: &'static str,
}

impl ElementKey {
    /// Returns the key for element type `E`.
    #[must_use]
    pub fn of<E: ContextElement>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: type_name::<E>(),
        }
    }

    /// The element type's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ElementKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ElementKey {}

impl PartialOrd for ElementKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElementKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl Hash for ElementKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identifies the logical actor on whose behalf work runs (a project,
/// a session, a request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTag {
    name: String,
}

impl IdentityTag {
    /// Creates an identity tag.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the identity this tag names.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.name
    }
}

impl ContextElement for IdentityTag {}

/// Marks work that belongs to a modal interaction. UI-thread tasks carrying
/// a marker are only relevant while that modality is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalityMarker {
    label: &'static str,
}

impl ModalityMarker {
    /// Creates a modality marker.
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self { label }
    }

    /// Returns the modality label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl ContextElement for ModalityMarker {}

/// Free-form diagnostic tag, e.g. the name of the activity that spawned
/// the work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticTag {
    label: String,
    policy: ChildPolicy,
}

impl DiagnosticTag {
    /// Creates a tag that propagates into children.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            policy: ChildPolicy::Inherit,
        }
    }

    /// Creates a tag that stays on the installing thread.
    #[must_use]
    pub fn local(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            policy: ChildPolicy::ThreadLocal,
        }
    }

    /// Returns the tag label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl ContextElement for DiagnosticTag {
    fn child_policy(&self) -> ChildPolicy {
        self.policy
    }
}
