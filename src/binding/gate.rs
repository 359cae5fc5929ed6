//! Re-entrancy gate.
//!
//! A single-owner, non-queueing mutex: work that arrives while the gate is
//! held is dropped, not deferred. This is the mechanism that breaks the
//! echo cycle where a CRDT mutation we made ourselves would be observed by
//! our own deep observer and translated straight back.

use std::sync::atomic::{AtomicBool, Ordering};

/// The gate. One per binding, held for the full duration of a translation
/// in either direction.
#[derive(Debug, Default)]
pub(crate) struct ReentrancyGate {
    held: AtomicBool,
}

impl ReentrancyGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate, or `None` if it is already held. The guard
    /// releases on drop, on every exit path.
    pub(crate) fn try_enter(&self) -> Option<GateGuard<'_>> {
        if self.held.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(GateGuard { gate: self })
        }
    }

    /// Whether the gate is currently held.
    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// RAII guard for [`ReentrancyGate`].
pub(crate) struct GateGuard<'a> {
    gate: &'a ReentrancyGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_entry_is_refused() {
        let gate = ReentrancyGate::new();
        let guard = gate.try_enter();
        assert!(guard.is_some());
        assert!(gate.try_enter().is_none());
        drop(guard);
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let gate = ReentrancyGate::new();
        {
            let _g = gate.try_enter().unwrap();
            assert!(gate.is_held());
        }
        assert!(!gate.is_held());
    }
}
