//! Immutable context sets.
//!
//! A [`ContextSet`] maps element types to shared element instances. Sets
//! are never mutated: every composition returns a new set that shares the
//! untouched entries with its source, so cloning and capturing a set is a
//! reference-count bump.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::element::{ChildPolicy, ContextElement, ElementKey};

#[derive(Clone)]
struct Entry {
    key: ElementKey,
    element: Arc<dyn ContextElement>,
    // Same allocation as `element`, kept for typed lookups.
    any: Arc<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<E: ContextElement>(element: Arc<E>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = element.clone();
        Self {
            key: ElementKey::of::<E>(),
            element,
            any,
        }
    }

    fn same_instance(&self, other: &Self) -> bool {
        self.key == other.key
            && core::ptr::eq(
                Arc::as_ptr(&self.any).cast::<()>(),
                Arc::as_ptr(&other.any).cast::<()>(),
            )
    }
}

type Entries = SmallVec<[Entry; 4]>;

/// An immutable mapping from element type to element instance.
///
/// Composition is associative, and on a key collision the right-hand
/// (later) element wins.
#[derive(Clone, Default)]
pub struct ContextSet {
    entries: Option<Arc<Entries>>,
}

impl ContextSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { entries: None }
    }

    /// A set holding a single element.
    #[must_use]
    pub fn of<E: ContextElement>(element: E) -> Self {
        Self::empty().with(element)
    }

    /// Returns a new set with `element` added, replacing any element of the
    /// same type.
    #[must_use]
    pub fn with<E: ContextElement>(&self, element: E) -> Self {
        self.with_arc(Arc::new(element))
    }

    /// Like [`with`](Self::with), but shares an existing instance.
    #[must_use]
    pub fn with_arc<E: ContextElement>(&self, element: Arc<E>) -> Self {
        let mut entries = self.entries_vec();
        insert(&mut entries, Entry::new(element));
        Self::from_entries(entries)
    }

    /// Returns a new set without the element of type `E`.
    #[must_use]
    pub fn without<E: ContextElement>(&self) -> Self {
        let key = ElementKey::of::<E>();
        if self.position(key).is_err() {
            return self.clone();
        }
        let mut entries = self.entries_vec();
        entries.retain(|e| e.key != key);
        Self::from_entries(entries)
    }

    /// Returns the element of type `E`, sharing the installed instance.
    #[must_use]
    pub fn get<E: ContextElement>(&self) -> Option<Arc<E>> {
        let idx = self.position(ElementKey::of::<E>()).ok()?;
        let entries = self.entries.as_ref()?;
        entries[idx].any.clone().downcast::<E>().ok()
    }

    /// Returns true if the set holds an element of type `E`.
    #[must_use]
    pub fn contains<E: ContextElement>(&self) -> bool {
        self.position(ElementKey::of::<E>()).is_ok()
    }

    /// Composes two sets. Elements of `other` replace same-typed elements
    /// of `self`.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        match (&self.entries, &other.entries) {
            (_, None) => self.clone(),
            (None, Some(_)) => other.clone(),
            (Some(_), Some(theirs)) => {
                let mut entries = self.entries_vec();
                for entry in theirs.iter() {
                    insert(&mut entries, entry.clone());
                }
                Self::from_entries(entries)
            }
        }
    }

    /// The set captured for spawned children: thread-local elements are
    /// left behind.
    #[must_use]
    pub fn for_child(&self) -> Self {
        let Some(entries) = &self.entries else {
            return Self::empty();
        };
        if entries
            .iter()
            .all(|e| e.element.child_policy() == ChildPolicy::Inherit)
        {
            return self.clone();
        }
        let kept: Entries = entries
            .iter()
            .filter(|e| e.element.child_policy() == ChildPolicy::Inherit)
            .cloned()
            .collect();
        Self::from_entries(kept)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.len())
    }

    /// Returns true if the set holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of the elements, in a stable order.
    pub fn keys(&self) -> impl Iterator<Item = ElementKey> + '_ {
        self.entries.iter().flat_map(|e| e.iter().map(|entry| entry.key))
    }

    /// The elements as trait objects.
    pub fn elements(&self) -> impl Iterator<Item = &Arc<dyn ContextElement>> + '_ {
        self.entries
            .iter()
            .flat_map(|e| e.iter().map(|entry| &entry.element))
    }

    fn position(&self, key: ElementKey) -> Result<usize, usize> {
        self.entries
            .as_ref()
            .map_or(Err(0), |e| e.binary_search_by(|entry| entry.key.cmp(&key)))
    }

    fn entries_vec(&self) -> Entries {
        self.entries
            .as_ref()
            .map_or_else(SmallVec::new, |e| Entries::clone(e))
    }

    fn from_entries(entries: Entries) -> Self {
        if entries.is_empty() {
            Self::empty()
        } else {
            Self {
                entries: Some(Arc::new(entries)),
            }
        }
    }
}

fn insert(entries: &mut Entries, entry: Entry) {
    match entries.binary_search_by(|e| e.key.cmp(&entry.key)) {
        Ok(idx) => entries[idx] = entry,
        Err(idx) => entries.insert(idx, entry),
    }
}

/// Two sets are equal when they hold the same element instances.
impl PartialEq for ContextSet {
    fn eq(&self, other: &Self) -> bool {
        match (&self.entries, &other.entries) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.same_instance(y)))
            }
            _ => false,
        }
    }
}

impl Eq for ContextSet {}

impl fmt::Debug for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elements()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::element::{DiagnosticTag, IdentityTag, ModalityMarker};

    #[test]
    fn empty_set() {
        let set = ContextSet::empty();
        assert!(set.is_empty());
        assert!(set.get::<IdentityTag>().is_none());
        assert_eq!(set, ContextSet::default());
    }

    #[test]
    fn get_returns_same_instance() {
        let tag = Arc::new(IdentityTag::new("p"));
        let set = ContextSet::empty().with_arc(Arc::clone(&tag));
        let got = set.get::<IdentityTag>().expect("present");
        assert!(Arc::ptr_eq(&tag, &got));
    }

    #[test]
    fn one_element_per_key() {
        let set = ContextSet::of(IdentityTag::new("a")).with(IdentityTag::new("b"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get::<IdentityTag>().map(|t| t.id().to_string()).as_deref(), Some("b"));
    }

    #[test]
    fn composing_never_mutates_source() {
        let base = ContextSet::of(IdentityTag::new("a"));
        let extended = base.with(ModalityMarker::new("dialog"));
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert!(!base.contains::<ModalityMarker>());
    }

    #[test]
    fn plus_right_wins() {
        let left = ContextSet::of(IdentityTag::new("left")).with(ModalityMarker::new("m"));
        let right = ContextSet::of(IdentityTag::new("right"));
        let composed = left.plus(&right);
        assert_eq!(composed.len(), 2);
        assert_eq!(composed.get::<IdentityTag>().map(|t| t.id().to_string()).as_deref(), Some("right"));
        assert_eq!(left.plus(&ContextSet::empty()), left);
        assert_eq!(ContextSet::empty().plus(&left), left);
    }

    #[test]
    fn without_removes_key() {
        let set = ContextSet::of(IdentityTag::new("a")).with(ModalityMarker::new("m"));
        let trimmed = set.without::<IdentityTag>();
        assert!(!trimmed.contains::<IdentityTag>());
        assert!(trimmed.contains::<ModalityMarker>());
        assert!(ContextSet::of(IdentityTag::new("x")).without::<IdentityTag>().is_empty());
    }

    #[test]
    fn for_child_drops_thread_local_elements() {
        let set = ContextSet::of(IdentityTag::new("a")).with(DiagnosticTag::local("here"));
        let child = set.for_child();
        assert!(child.contains::<IdentityTag>());
        assert!(!child.contains::<DiagnosticTag>());

        let inherited = ContextSet::of(DiagnosticTag::new("travels"));
        assert_eq!(inherited.for_child(), inherited);
    }

    #[test]
    fn equality_is_by_instance() {
        let a = ContextSet::of(IdentityTag::new("same"));
        let b = ContextSet::of(IdentityTag::new("same"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        let shared = Arc::new(IdentityTag::new("shared"));
        assert_eq!(
            ContextSet::empty().with_arc(Arc::clone(&shared)),
            ContextSet::empty().with_arc(shared)
        );
    }

    #[test]
    fn debug_lists_elements() {
        let set = ContextSet::of(ModalityMarker::new("dialog"));
        assert!(format!("{set:?}").contains("dialog"));
    }
}
