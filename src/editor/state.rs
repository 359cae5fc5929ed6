//! Editor state and transactions.
//!
//! A [`Transaction`] describes a state replacement: optionally a new
//! document, optionally a new selection, plus metadata the sync binding
//! uses to tag its own transactions (change origin, active snapshot).
//! Applying a transaction never mutates — it produces a fresh
//! [`EditorState`] sharing unchanged structure with the old one.

use std::sync::Arc;

use yrs::Snapshot;

use super::node::Node;
use super::schema::Schema;

/// A text selection expressed in document positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSelection {
    /// The fixed end of the selection.
    pub anchor: usize,
    /// The moving end of the selection (equal to `anchor` when collapsed).
    pub head: usize,
}

impl TextSelection {
    /// Selection spanning `anchor..head`.
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Collapsed cursor at `pos`.
    pub fn collapsed(pos: usize) -> Self {
        Self { anchor: pos, head: pos }
    }

    fn clamp(self, max: usize) -> Self {
        Self {
            anchor: self.anchor.min(max),
            head: self.head.min(max),
        }
    }
}

/// Snapshot metadata carried by binding-issued transactions.
///
/// `None` fields mean "leave the current value"; the binding always sets
/// both when entering or leaving a historical view.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMeta {
    /// The snapshot being rendered, or `None` to return to the live view.
    pub snapshot: Option<Snapshot>,
    /// The comparison baseline for change annotations.
    pub prev_snapshot: Option<Snapshot>,
}

/// A description of one editor state change.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    doc: Option<Node>,
    selection: Option<TextSelection>,
    change_origin: bool,
    snapshot_meta: Option<SnapshotMeta>,
}

impl Transaction {
    /// An empty transaction (applies as a no-op).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole document.
    pub fn replace_doc(mut self, doc: Node) -> Self {
        self.doc = Some(doc);
        self
    }

    /// Set the selection.
    pub fn with_selection(mut self, selection: TextSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Tag this transaction as originating from the remote side of the
    /// binding. Downstream listeners use this to tell remote from local.
    pub(crate) fn with_change_origin(mut self) -> Self {
        self.change_origin = true;
        self
    }

    /// Attach snapshot metadata.
    pub(crate) fn with_snapshot_meta(mut self, meta: SnapshotMeta) -> Self {
        self.snapshot_meta = Some(meta);
        self
    }

    /// New document carried by this transaction, if any.
    pub fn doc(&self) -> Option<&Node> {
        self.doc.as_ref()
    }

    /// New selection carried by this transaction, if any.
    pub fn selection(&self) -> Option<TextSelection> {
        self.selection
    }

    /// True when the change was produced by the binding from a remote
    /// CRDT transaction rather than by a local edit.
    pub fn is_change_origin(&self) -> bool {
        self.change_origin
    }

    /// Snapshot metadata, if this transaction carries any.
    pub fn snapshot_meta(&self) -> Option<&SnapshotMeta> {
        self.snapshot_meta.as_ref()
    }
}

/// The current document, selection and schema of an editor.
#[derive(Clone)]
pub struct EditorState {
    schema: Arc<Schema>,
    doc: Node,
    selection: TextSelection,
}

impl EditorState {
    /// Create a state around an initial document.
    pub fn new(schema: Arc<Schema>, doc: Node) -> Self {
        Self {
            schema,
            doc,
            selection: TextSelection::collapsed(0),
        }
    }

    /// The schema documents of this state conform to.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The current document root.
    pub fn doc(&self) -> &Node {
        &self.doc
    }

    /// The current selection.
    pub fn selection(&self) -> TextSelection {
        self.selection
    }

    /// Apply a transaction, producing the next state.
    ///
    /// A selection not set by the transaction is carried over, clamped to
    /// the new document's content size.
    pub fn apply(&self, tr: &Transaction) -> EditorState {
        let doc = tr.doc().cloned().unwrap_or_else(|| self.doc.clone());
        let max = doc.content_size();
        let selection = tr.selection().unwrap_or(self.selection).clamp(max);
        EditorState {
            schema: self.schema.clone(),
            doc,
            selection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{doc_node, paragraph, rich_schema};

    #[test]
    fn test_apply_replaces_doc_and_keeps_selection() {
        let schema = Arc::new(rich_schema());
        let state = EditorState::new(schema.clone(), doc_node(&schema, vec![]));
        let doc = doc_node(&schema, vec![paragraph(&schema, "hello")]);
        let tr = Transaction::new().replace_doc(doc.clone());
        let next = state.apply(&tr);
        assert!(Node::ptr_eq(next.doc(), &doc));
        assert_eq!(next.selection(), TextSelection::collapsed(0));
    }

    #[test]
    fn test_carried_selection_is_clamped() {
        let schema = Arc::new(rich_schema());
        let big = doc_node(&schema, vec![paragraph(&schema, "hello")]);
        let state = EditorState::new(schema.clone(), big);
        let moved = state.apply(&Transaction::new().with_selection(TextSelection::collapsed(7)));
        assert_eq!(moved.selection().head, 7);

        let small = doc_node(&schema, vec![paragraph(&schema, "x")]);
        let shrunk = moved.apply(&Transaction::new().replace_doc(small));
        assert_eq!(shrunk.selection().head, 3);
    }

    #[test]
    fn test_change_origin_flag() {
        let tr = Transaction::new().with_change_origin();
        assert!(tr.is_change_origin());
        assert!(!Transaction::new().is_change_origin());
    }
}
