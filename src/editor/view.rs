//! Headless editor view: shared state handle plus dispatch.
//!
//! The view is the meeting point of the host application and the sync
//! binding. The host edits by dispatching transactions; the binding
//! registers an update listener and issues its own transactions when the
//! remote side changes. Listener callbacks run after the internal lock is
//! released, so a listener may freely call back into the view.

use std::sync::{Arc, Mutex};

use yrs::Snapshot;

use super::state::{EditorState, Transaction};

/// Listener invoked after every dispatched transaction.
pub type UpdateListener = Arc<dyn Fn(&Transaction, &EditorState) + Send + Sync>;

/// Identifier of a registered update listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Sync-related state mirrored on the view, merged from transaction
/// metadata as transactions apply.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Currently rendered snapshot, if a historical view is active.
    pub snapshot: Option<Snapshot>,
    /// Baseline snapshot for change annotations.
    pub prev_snapshot: Option<Snapshot>,
    /// Whether the last applied transaction was remote-originated.
    pub is_change_origin: bool,
}

struct ViewInner {
    state: EditorState,
    sync: SyncState,
    listeners: Vec<(ListenerId, UpdateListener)>,
    next_listener: u64,
}

/// A cheap-to-clone handle on an editor's state.
#[derive(Clone)]
pub struct EditorView {
    inner: Arc<Mutex<ViewInner>>,
}

impl EditorView {
    /// Create a view around an initial state.
    pub fn new(state: EditorState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ViewInner {
                state,
                sync: SyncState::default(),
                listeners: Vec::new(),
                next_listener: 0,
            })),
        }
    }

    /// Snapshot of the current editor state.
    pub fn state(&self) -> EditorState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Current sync state (snapshot pair and change-origin flag).
    pub fn sync_state(&self) -> SyncState {
        self.inner.lock().unwrap().sync.clone()
    }

    /// Whether the editor accepts local edits. False exactly while a
    /// historical snapshot is rendered.
    pub fn editable(&self) -> bool {
        self.inner.lock().unwrap().sync.snapshot.is_none()
    }

    /// Apply a transaction and notify listeners with the resulting state.
    pub fn dispatch(&self, tr: Transaction) {
        let (listeners, state) = {
            let mut inner = self.inner.lock().unwrap();
            let next = inner.state.apply(&tr);
            inner.state = next.clone();
            inner.sync.is_change_origin = tr.is_change_origin();
            if let Some(meta) = tr.snapshot_meta() {
                inner.sync.snapshot = meta.snapshot.clone();
                inner.sync.prev_snapshot = meta.prev_snapshot.clone();
            }
            let listeners: Vec<UpdateListener> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (listeners, next)
        };
        for listener in listeners {
            listener(&tr, &state);
        }
    }

    /// Register an update listener; returns an id for removal.
    pub fn on_update(&self, listener: UpdateListener) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.listeners.push((id, listener));
        id
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use yrs::{ReadTxn, Transact};

    use super::*;
    use crate::editor::state::SnapshotMeta;
    use crate::test_support::{doc_node, paragraph, rich_schema};

    fn empty_view() -> EditorView {
        let schema = Arc::new(rich_schema());
        EditorView::new(EditorState::new(schema.clone(), doc_node(&schema, vec![])))
    }

    #[test]
    fn test_dispatch_notifies_listeners() {
        let view = empty_view();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        view.on_update(Arc::new(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        view.dispatch(Transaction::new());
        view.dispatch(Transaction::new());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_sees_applied_state() {
        let schema = Arc::new(rich_schema());
        let view = EditorView::new(EditorState::new(schema.clone(), doc_node(&schema, vec![])));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        view.on_update(Arc::new(move |_, state| {
            seen2.store(state.doc().child_count(), Ordering::SeqCst);
        }));

        let doc = doc_node(&schema, vec![paragraph(&schema, "a")]);
        view.dispatch(Transaction::new().replace_doc(doc));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_listener() {
        let view = empty_view();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = view.on_update(Arc::new(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        view.remove_listener(id);
        view.dispatch(Transaction::new());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_editable_follows_snapshot_meta() {
        let view = empty_view();
        assert!(view.editable());

        let doc = yrs::Doc::new();
        let snap = doc.transact().snapshot();
        view.dispatch(Transaction::new().with_snapshot_meta(SnapshotMeta {
            snapshot: Some(snap),
            prev_snapshot: None,
        }));
        assert!(!view.editable());

        view.dispatch(Transaction::new().with_snapshot_meta(SnapshotMeta::default()));
        assert!(view.editable());
    }
}
