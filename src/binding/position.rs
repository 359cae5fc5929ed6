//! Absolute ↔ relative position conversion.
//!
//! Editor selections are absolute offsets into the document; those go
//! stale the moment a remote edit lands. Before translating a remote
//! batch the binding holds the selection as CRDT sticky indices, which
//! ride along with the content they were anchored to, and converts back
//! afterwards. Conversion failure is silent by design: a selection that
//! cannot be restored is simply not restored.
//!
//! The two trees mirror each other outside of a reconcile pass, so both
//! conversions walk only the CRDT tree; sizes follow the editor position
//! convention (elements cost 2, text costs its byte length).

use yrs::branch::BranchID;
use yrs::{
    Assoc, GetString, IndexedSequence, ReadTxn, StickyIndex, TransactionMut, XmlFragmentRef,
    XmlOut,
};

use super::xml::{xml_branch_id, ContainerRef};
use crate::editor::TextSelection;

/// A selection held as CRDT-relative positions.
#[derive(Debug, Clone)]
pub(crate) struct RelativeSelection {
    pub anchor: Option<StickyIndex>,
    pub head: Option<StickyIndex>,
}

/// Capture an absolute selection as sticky indices.
pub(crate) fn capture_selection(
    txn: &mut TransactionMut,
    fragment: &XmlFragmentRef,
    selection: TextSelection,
) -> RelativeSelection {
    RelativeSelection {
        anchor: absolute_to_relative(txn, fragment, selection.anchor),
        head: absolute_to_relative(txn, fragment, selection.head),
    }
}

/// Restore a selection from sticky indices. Returns `None` unless both
/// ends resolve.
pub(crate) fn restore_selection<T: ReadTxn>(
    txn: &T,
    fragment: &XmlFragmentRef,
    rel: &RelativeSelection,
) -> Option<TextSelection> {
    let anchor = relative_to_absolute(txn, fragment, rel.anchor.as_ref()?)?;
    let head = relative_to_absolute(txn, fragment, rel.head.as_ref()?)?;
    Some(TextSelection::new(anchor, head))
}

/// Convert an absolute document position into a sticky index, or `None`
/// when the position lies outside the tree.
pub fn absolute_to_relative(
    txn: &mut TransactionMut,
    fragment: &XmlFragmentRef,
    pos: usize,
) -> Option<StickyIndex> {
    descend(txn, &ContainerRef::Fragment(fragment.clone()), pos)
}

fn descend(txn: &mut TransactionMut, container: &ContainerRef, pos: usize) -> Option<StickyIndex> {
    let children = container.children(&*txn);
    let mut offset = 0usize;
    for (i, child) in children.iter().enumerate() {
        match child {
            XmlOut::Text(text) => {
                let len = text.get_string(&*txn).len();
                if pos <= offset + len {
                    return text.sticky_index(txn, (pos - offset) as u32, Assoc::After);
                }
                offset += len;
            }
            XmlOut::Element(el) => {
                if pos == offset {
                    return sticky_at(txn, container, i as u32, Assoc::After);
                }
                let size = element_size(&*txn, el);
                if pos < offset + size {
                    return descend(txn, &ContainerRef::Element(el.clone()), pos - offset - 1);
                }
                offset += size;
            }
            XmlOut::Fragment(_) => return None,
        }
    }
    // At or past the end of this container's content.
    let len = children.len() as u32;
    sticky_at(txn, container, len, Assoc::Before)
}

fn sticky_at(
    txn: &mut TransactionMut,
    container: &ContainerRef,
    index: u32,
    assoc: Assoc,
) -> Option<StickyIndex> {
    match container {
        ContainerRef::Fragment(frag) => frag.sticky_index(txn, index, assoc),
        ContainerRef::Element(el) => el.sticky_index(txn, index, assoc),
    }
}

/// Convert a sticky index back into an absolute document position, or
/// `None` when its anchor no longer exists in the tree.
pub fn relative_to_absolute<T: ReadTxn>(
    txn: &T,
    fragment: &XmlFragmentRef,
    rel: &StickyIndex,
) -> Option<usize> {
    let offset = rel.get_offset(txn)?;
    let target = offset.branch.id();
    locate(
        txn,
        &ContainerRef::Fragment(fragment.clone()),
        0,
        &target,
        offset.index,
    )
}

fn element_size<T: ReadTxn>(txn: &T, el: &yrs::XmlElementRef) -> usize {
    2 + content_size(txn, &ContainerRef::Element(el.clone()))
}

fn content_size<T: ReadTxn>(txn: &T, container: &ContainerRef) -> usize {
    container
        .children(txn)
        .iter()
        .map(|child| child_size(txn, child))
        .sum()
}

fn child_size<T: ReadTxn>(txn: &T, child: &XmlOut) -> usize {
    match child {
        XmlOut::Element(el) => element_size(txn, el),
        XmlOut::Text(text) => text.get_string(txn).len(),
        XmlOut::Fragment(_) => 0,
    }
}

fn locate<T: ReadTxn>(
    txn: &T,
    container: &ContainerRef,
    base: usize,
    target: &BranchID,
    index: u32,
) -> Option<usize> {
    if container.branch_id() == *target {
        let children = container.children(txn);
        let upto = (index as usize).min(children.len());
        let mut pos = base;
        for child in children.iter().take(upto) {
            pos += child_size(txn, child);
        }
        return Some(pos);
    }
    let mut pos = base;
    for child in container.children(txn) {
        match &child {
            XmlOut::Text(text) => {
                let len = text.get_string(txn).len();
                if xml_branch_id(&child) == *target {
                    return Some(pos + (index as usize).min(len));
                }
                pos += len;
            }
            XmlOut::Element(el) => {
                let inner = ContainerRef::Element(el.clone());
                if let Some(found) = locate(txn, &inner, pos + 1, target, index) {
                    return Some(found);
                }
                pos += element_size(txn, el);
            }
            XmlOut::Fragment(_) => {}
        }
    }
    None
}
