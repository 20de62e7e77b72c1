//! Algebraic laws of context-set composition and carrier installation.

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use strand::cx::{ContextCarrier, ContextSet, DiagnosticTag, IdentityTag, ModalityMarker};
use strand::{ChildPolicy, ContextElement};

const MODALITIES: [&str; 3] = ["dialog", "wizard", "popup"];

fn arb_set() -> impl Strategy<Value = ContextSet> {
    (
        prop::option::of("[a-z]{1,6}"),
        prop::option::of(("[a-z]{1,6}", any::<bool>())),
        prop::option::of(0..MODALITIES.len()),
    )
        .prop_map(|(identity, diag, modality)| {
            let mut set = ContextSet::empty();
            if let Some(name) = identity {
                set = set.with(IdentityTag::new(name));
            }
            if let Some((label, local)) = diag {
                let tag = if local {
                    DiagnosticTag::local(label)
                } else {
                    DiagnosticTag::new(label)
                };
                set = set.with(tag);
            }
            if let Some(idx) = modality {
                set = set.with(ModalityMarker::new(MODALITIES[idx]));
            }
            set
        })
}

fn same<E: ContextElement>(a: Option<Arc<E>>, b: Option<Arc<E>>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => Arc::ptr_eq(&x, &y),
        (None, None) => true,
        _ => false,
    }
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn composition_is_associative(a in arb_set(), b in arb_set(), c in arb_set()) {
        prop_assert_eq!(a.plus(&b).plus(&c), a.plus(&b.plus(&c)));
    }

    #[test]
    fn empty_is_identity(a in arb_set()) {
        prop_assert_eq!(a.plus(&ContextSet::empty()), a.clone());
        prop_assert_eq!(ContextSet::empty().plus(&a), a);
    }

    #[test]
    fn right_operand_wins_on_collision(a in arb_set(), b in arb_set()) {
        let composed = a.plus(&b);
        let expected = b.get::<IdentityTag>().or_else(|| a.get::<IdentityTag>());
        prop_assert!(same(composed.get::<IdentityTag>(), expected));
        let expected = b.get::<DiagnosticTag>().or_else(|| a.get::<DiagnosticTag>());
        prop_assert!(same(composed.get::<DiagnosticTag>(), expected));
        let expected = b.get::<ModalityMarker>().or_else(|| a.get::<ModalityMarker>());
        prop_assert!(same(composed.get::<ModalityMarker>(), expected));
    }

    #[test]
    fn without_removes_only_that_key(a in arb_set(), name in "[a-z]{1,6}") {
        let with = a.with(IdentityTag::new(name));
        let without = with.without::<IdentityTag>();
        prop_assert!(!without.contains::<IdentityTag>());
        prop_assert!(same(without.get::<DiagnosticTag>(), a.get::<DiagnosticTag>()));
        prop_assert!(same(without.get::<ModalityMarker>(), a.get::<ModalityMarker>()));
    }

    #[test]
    fn child_set_drops_exactly_thread_local_elements(a in arb_set()) {
        let child = a.for_child();
        let keeps_tag = a
            .get::<DiagnosticTag>()
            .is_some_and(|t| t.child_policy() == ChildPolicy::Inherit);
        prop_assert_eq!(child.contains::<DiagnosticTag>(), keeps_tag);
        prop_assert!(same(child.get::<IdentityTag>(), a.get::<IdentityTag>()));
        prop_assert!(same(child.get::<ModalityMarker>(), a.get::<ModalityMarker>()));
        prop_assert_eq!(child.for_child(), child);
    }

    #[test]
    fn install_restores_exact_prior_set(outer in arb_set(), inner in arb_set()) {
        let before = ContextCarrier::current();
        ContextCarrier::with(outer.clone(), || {
            let seen_inside = ContextCarrier::with(inner.clone(), ContextCarrier::current);
            assert_eq!(seen_inside, inner);
            assert_eq!(ContextCarrier::current(), outer);
        });
        prop_assert_eq!(ContextCarrier::current(), before);
    }
}

#[test]
fn guards_restore_in_reverse_order() {
    init_test_logging();
    test_phase!("guards_restore_in_reverse_order");
    let a = ContextSet::of(IdentityTag::new("a"));
    let b = ContextSet::of(IdentityTag::new("b"));
    {
        let _outer = ContextCarrier::install(a.clone());
        {
            let _inner = ContextCarrier::install(b.clone());
            assert_eq!(ContextCarrier::current(), b);
        }
        assert_eq!(ContextCarrier::current(), a);
    }
    assert!(ContextCarrier::current().is_empty());
}

#[test]
fn panic_inside_installed_context_still_restores() {
    init_test_logging();
    let set = ContextSet::of(IdentityTag::new("doomed"));
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        ContextCarrier::with(set, || panic!("body failed"));
    }));
    assert!(caught.is_err());
    assert!(ContextCarrier::current().is_empty());
}
