//! Identity map between CRDT nodes and their editor counterparts.
//!
//! Elements map to a single editor node; a CRDT text maps to the ordered
//! run of inline text nodes it materialized into. The map is what makes
//! echo suppression and the reconciler's identity anchors work: an entry
//! says "this CRDT node was last seen as exactly this editor value".
//!
//! Entries are only added by the materializers and reconcilers, and only
//! removed on CRDT deletions, at the start of a snapshot render, or on a
//! forced re-render.

use std::collections::HashMap;

use yrs::branch::BranchID;
use yrs::DeleteSet;

use crate::editor::Node;

/// Editor-side value of a mapping entry.
///
/// A tagged sum rather than a trait object: identity comparison needs to
/// distinguish a single node from a run structurally.
#[derive(Debug, Clone)]
pub enum MappedNode {
    /// Counterpart of an element or the root fragment.
    Element(Node),
    /// Counterpart of a CRDT text: a contiguous run of inline text nodes.
    TextRun(Vec<Node>),
}

/// The identity map. Keys are CRDT branch identifiers, which are stable
/// across transactions for the lifetime of the node.
#[derive(Debug, Default)]
pub struct TypeMapping {
    entries: HashMap<BranchID, MappedNode>,
}

impl TypeMapping {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up the editor counterpart of a CRDT node.
    pub fn get(&self, id: &BranchID) -> Option<&MappedNode> {
        self.entries.get(id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn set_element(&mut self, id: BranchID, node: Node) {
        self.entries.insert(id, MappedNode::Element(node));
    }

    pub(crate) fn set_text_run(&mut self, id: BranchID, run: Vec<Node>) {
        self.entries.insert(id, MappedNode::TextRun(run));
    }

    pub(crate) fn remove(&mut self, id: &BranchID) {
        self.entries.remove(id);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every entry whose CRDT node is covered by the delete set.
    pub(crate) fn invalidate_deleted(&mut self, deleted: &DeleteSet) {
        self.entries.retain(|id, _| match id {
            BranchID::Nested(item_id) => !deleted.is_deleted(item_id),
            BranchID::Root(_) => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use yrs::{Transact, XmlFragment, XmlTextPrelim};

    use super::*;
    use crate::binding::xml::branch_id_of;
    use crate::test_support::text_leaf;

    #[test]
    fn test_set_get_remove() {
        let doc = yrs::Doc::new();
        let frag = doc.get_or_insert_xml_fragment("t");
        let text = {
            let mut txn = doc.transact_mut();
            frag.insert(&mut txn, 0, XmlTextPrelim::new("ab"))
        };
        let id = branch_id_of(&text);

        let mut mapping = TypeMapping::new();
        mapping.set_text_run(id.clone(), vec![text_leaf("ab")]);
        assert!(matches!(mapping.get(&id), Some(MappedNode::TextRun(run)) if run.len() == 1));

        mapping.remove(&id);
        assert!(mapping.get(&id).is_none());
    }

    #[test]
    fn test_invalidate_deleted_prunes_entries() {
        let doc = yrs::Doc::new();
        let frag = doc.get_or_insert_xml_fragment("t");
        let text = {
            let mut txn = doc.transact_mut();
            frag.insert(&mut txn, 0, XmlTextPrelim::new("ab"))
        };
        let id = branch_id_of(&text);

        let mut mapping = TypeMapping::new();
        mapping.set_text_run(id.clone(), vec![text_leaf("ab")]);

        let ds = {
            let mut txn = doc.transact_mut();
            frag.remove_range(&mut txn, 0, 1);
            txn.delete_set().clone()
        };
        mapping.invalidate_deleted(&ds);
        assert!(mapping.get(&id).is_none());
    }
}
