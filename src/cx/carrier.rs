//! The thread-local context slot.
//!
//! Each thread has exactly one ambient [`ContextSet`]. Installing a set
//! returns an [`InstallGuard`]; dropping the guard puts back the exact set
//! that was installed before, so installs nest and unwinding through a
//! guard restores the outer context.

use core::fmt;
use core::marker::PhantomData;
use std::cell::RefCell;

use super::element::ContextElement;
use super::set::ContextSet;

thread_local! {
    static CURRENT: RefCell<ContextSet> = const { RefCell::new(ContextSet::empty()) };
}

/// Access to the calling thread's ambient context.
#[derive(Debug, Clone, Copy)]
pub struct ContextCarrier;

impl ContextCarrier {
    /// Returns the ambient set of the calling thread (empty if nothing is
    /// installed).
    #[must_use]
    pub fn current() -> ContextSet {
        CURRENT
            .try_with(|slot| slot.borrow().clone())
            .unwrap_or_default()
    }

    /// Returns the ambient element of type `E`, if any.
    #[must_use]
    pub fn get<E: ContextElement>() -> Option<std::sync::Arc<E>> {
        Self::current().get::<E>()
    }

    /// Installs `set` until the returned guard is dropped.
    #[must_use = "the previous context is restored when the guard drops"]
    pub fn install(set: ContextSet) -> InstallGuard {
        let prev = CURRENT.try_with(|slot| slot.replace(set)).ok();
        InstallGuard {
            prev,
            _not_send: PhantomData,
        }
    }

    /// Installs an empty set until the returned guard is dropped.
    #[must_use = "the previous context is restored when the guard drops"]
    pub fn reset() -> InstallGuard {
        Self::install(ContextSet::empty())
    }

    /// Runs `f` with `set` installed.
    pub fn with<R>(set: ContextSet, f: impl FnOnce() -> R) -> R {
        let _guard = Self::install(set);
        f()
    }

    /// Runs `f` with the ambient set extended by `element`.
    pub fn with_element<E: ContextElement, R>(element: E, f: impl FnOnce() -> R) -> R {
        Self::with(Self::current().with(element), f)
    }
}

/// Restores the previously installed context on drop.
///
/// The guard is tied to the thread that created it.
pub struct InstallGuard {
    prev: Option<ContextSet>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            let _ = CURRENT.try_with(|slot| {
                *slot.borrow_mut() = prev;
            });
        }
    }
}

impl fmt::Debug for InstallGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallGuard")
            .field("prev", &self.prev)
            .finish()
    }
}
