//! Editor → CRDT reconciliation.
//!
//! Diffs an editor tree against the current CRDT tree and applies the
//! smallest mutation set that makes the CRDT match. The diff is a
//! two-pointer scan seeded by identity anchors: unchanged subtrees keep
//! their exact editor-node identity across transactions, so an identity
//! hit in the mapping pins the scan to the true boundary of an edit. That
//! keeps untouched siblings' CRDT identities stable, which is what remote
//! peers (and the operation log) see.
//!
//! This is a heuristic, not a minimum tree-edit distance; when both ends
//! of the un-trimmed middle look updatable the child-equality factor
//! breaks the tie (see [`reconcile_children`]).

use std::collections::HashSet;
use std::sync::Arc;

use yrs::types::Attrs;
use yrs::{Any, ReadTxn, Text, TransactionMut, Xml, XmlElementPrelim, XmlElementRef, XmlOut, XmlTextPrelim, XmlTextRef};

use super::mapping::{MappedNode, TypeMapping};
use super::materialize::{live_text_chunks, marks_to_attrs, YCHANGE_KEY};
use super::xml::{any_to_attrs, branch_id_of, read_attributes, xml_branch_id, ContainerRef};
use crate::editor::Node;
use crate::error::{BridgeError, Result};

/// The shape a child list takes for diffing: maximal runs of text nodes
/// collapse into one entry, mirroring how the CRDT stores a whole run as
/// a single text node.
#[derive(Debug, Clone)]
pub(crate) enum NormalizedChild {
    Element(Node),
    TextRun(Vec<Node>),
}

impl NormalizedChild {
    fn as_element(&self) -> Option<&Node> {
        match self {
            NormalizedChild::Element(node) => Some(node),
            NormalizedChild::TextRun(_) => None,
        }
    }
}

/// Collapse a node's children into normalized shape.
pub(crate) fn normalize_children(node: &Node) -> Vec<NormalizedChild> {
    let mut out = Vec::new();
    let mut run: Vec<Node> = Vec::new();
    for child in node.children() {
        if child.is_text() {
            run.push(child.clone());
        } else {
            if !run.is_empty() {
                out.push(NormalizedChild::TextRun(std::mem::take(&mut run)));
            }
            out.push(NormalizedChild::Element(child.clone()));
        }
    }
    if !run.is_empty() {
        out.push(NormalizedChild::TextRun(run));
    }
    out
}

// ===========================================================================
// Equality predicates (pure reads, no mapping writes)
// ===========================================================================

/// Attribute equality after dropping nulls and the change annotation.
pub(crate) fn equal_attrs(a: &Attrs, b: &Attrs) -> bool {
    let significant = |attrs: &Attrs| {
        attrs
            .iter()
            .filter(|(k, v)| k.as_ref() != YCHANGE_KEY && **v != Any::Null)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Attrs>()
    };
    significant(a) == significant(b)
}

/// Does this CRDT text render exactly as the given run of editor text
/// nodes, content and marks both?
pub(crate) fn equal_text<T: ReadTxn>(txn: &T, ytext: &XmlTextRef, run: &[Node]) -> bool {
    let chunks = live_text_chunks(txn, ytext);
    chunks.len() == run.len()
        && chunks.iter().zip(run).all(|(chunk, node)| {
            chunk.insert == node.text().unwrap_or("")
                && chunk.attrs.len() == node.marks().len()
                && node.marks().iter().all(|mark| {
                    let delta_attrs = chunk
                        .attrs
                        .get(mark.name())
                        .map(any_to_attrs)
                        .unwrap_or_default();
                    equal_attrs(&delta_attrs, mark.attrs())
                })
        })
}

fn tag_matches(el: &XmlElementRef, node: &Node) -> bool {
    el.tag().to_string() == node.name()
}

/// Structural equality between a CRDT child and a normalized editor child.
pub(crate) fn equal_nodes<T: ReadTxn>(txn: &T, y: &XmlOut, p: &NormalizedChild) -> bool {
    match (y, p) {
        (XmlOut::Element(el), NormalizedChild::Element(node)) => {
            if !tag_matches(el, node) {
                return false;
            }
            let normalized = normalize_children(node);
            let container = ContainerRef::Element(el.clone());
            container.len(txn) as usize == normalized.len()
                && equal_attrs(&read_attributes(el, txn), node.attrs())
                && container
                    .children(txn)
                    .iter()
                    .zip(&normalized)
                    .all(|(yc, pc)| equal_nodes(txn, yc, pc))
        }
        (XmlOut::Text(ytext), NormalizedChild::TextRun(run)) => equal_text(txn, ytext, run),
        _ => false,
    }
}

/// Identity equality between a mapping entry and a normalized child.
pub(crate) fn mapped_identity(mapped: Option<&MappedNode>, p: &NormalizedChild) -> bool {
    match (mapped, p) {
        (Some(MappedNode::Element(m)), NormalizedChild::Element(node)) => Node::ptr_eq(m, node),
        (Some(MappedNode::TextRun(m)), NormalizedChild::TextRun(run)) => {
            m.len() == run.len() && m.iter().zip(run).all(|(a, b)| Node::ptr_eq(a, b))
        }
        _ => false,
    }
}

fn set_mapping_entry(mapping: &mut TypeMapping, y: &XmlOut, p: &NormalizedChild) {
    let id = xml_branch_id(y);
    match p {
        NormalizedChild::Element(node) => mapping.set_element(id, node.clone()),
        NormalizedChild::TextRun(run) => mapping.set_text_run(id, run.clone()),
    }
}

/// Count agreeing child positions from both ends of an element pair,
/// stopping at the first mismatch per side. The factor steers the middle
/// tie-break; `found_mapped` records whether any agreement came from an
/// identity hit, which outweighs raw counts.
fn compute_child_equality<T: ReadTxn>(
    txn: &T,
    el: &XmlElementRef,
    node: &Node,
    mapping: &TypeMapping,
) -> (usize, bool) {
    let container = ContainerRef::Element(el.clone());
    let y_children = container.children(txn);
    let p_children = normalize_children(node);
    let y_cnt = y_children.len();
    let p_cnt = p_children.len();
    let min_cnt = y_cnt.min(p_cnt);

    let mut left = 0;
    let mut right = 0;
    let mut found_mapped = false;

    while left < min_cnt {
        let yc = &y_children[left];
        let pc = &p_children[left];
        if mapped_identity(mapping.get(&xml_branch_id(yc)), pc) {
            found_mapped = true;
        } else if !equal_nodes(txn, yc, pc) {
            break;
        }
        left += 1;
    }
    while left + right < min_cnt {
        let yc = &y_children[y_cnt - right - 1];
        let pc = &p_children[p_cnt - right - 1];
        if mapped_identity(mapping.get(&xml_branch_id(yc)), pc) {
            found_mapped = true;
        } else if !equal_nodes(txn, yc, pc) {
            break;
        }
        right += 1;
    }
    (left + right, found_mapped)
}

// ===========================================================================
// Reconciliation
// ===========================================================================

/// Reconcile a CRDT container against its editor counterpart.
///
/// Precondition: `y` is the root fragment, or an element whose tag equals
/// the node's type name — anything else is a programmer error, reported as
/// [`BridgeError::NodeNameMismatch`].
pub(crate) fn reconcile_container(
    txn: &mut TransactionMut,
    y: &ContainerRef,
    node: &Node,
    mapping: &mut TypeMapping,
) -> Result<()> {
    if let Some(tag) = y.tag() {
        if tag != node.name() {
            return Err(BridgeError::NodeNameMismatch {
                crdt: tag,
                editor: node.name().to_string(),
            });
        }
    }
    mapping.set_element(y.branch_id(), node.clone());
    if let ContainerRef::Element(el) = y {
        reconcile_attributes(txn, el, node);
    }
    reconcile_children(txn, y, node, mapping)
}

/// Make an element's attributes match the editor node's: set what differs,
/// delete what disappeared. Null-valued and change-annotation attributes
/// count as absent.
fn reconcile_attributes(txn: &mut TransactionMut, el: &XmlElementRef, node: &Node) {
    let current = read_attributes(el, txn);
    for (key, value) in node.attrs() {
        if key.as_ref() == YCHANGE_KEY || *value == Any::Null {
            continue;
        }
        if current.get(key) != Some(value) {
            el.insert_attribute(txn, key.clone(), value.clone());
        }
    }
    for key in current.keys() {
        match node.attrs().get(key) {
            Some(value) if *value != Any::Null => {}
            _ => el.remove_attribute(txn, &key.as_ref()),
        }
    }
}

fn reconcile_children(
    txn: &mut TransactionMut,
    y: &ContainerRef,
    node: &Node,
    mapping: &mut TypeMapping,
) -> Result<()> {
    let y_children = y.children(txn);
    let p_children = normalize_children(node);
    let y_cnt = y_children.len();
    let p_cnt = p_children.len();
    let min_cnt = y_cnt.min(p_cnt);

    let mut left = 0;
    let mut right = 0;

    // Left trim: identity hits anchor for free, structural equality
    // re-seeds the mapping so the next pass gets the identity hit.
    while left < min_cnt {
        let yc = &y_children[left];
        let pc = &p_children[left];
        if mapped_identity(mapping.get(&xml_branch_id(yc)), pc) {
            left += 1;
        } else if equal_nodes(txn, yc, pc) {
            set_mapping_entry(mapping, yc, pc);
            left += 1;
        } else {
            break;
        }
    }

    // Right trim, kept one short of the left cursor so the ranges cannot
    // cross.
    while left + right + 1 < min_cnt {
        let yc = &y_children[y_cnt - right - 1];
        let pc = &p_children[p_cnt - right - 1];
        if mapped_identity(mapping.get(&xml_branch_id(yc)), pc) {
            right += 1;
        } else if equal_nodes(txn, yc, pc) {
            set_mapping_entry(mapping, yc, pc);
            right += 1;
        } else {
            break;
        }
    }

    // Middle rewrite.
    while y_cnt - left - right > 0 && p_cnt - left - right > 0 {
        let yc = &y_children[left];
        let pc = &p_children[left];

        if let (XmlOut::Text(ytext), NormalizedChild::TextRun(run)) = (yc, pc) {
            if !equal_text(txn, ytext, run) {
                reconcile_text(txn, ytext, run, mapping);
            }
            left += 1;
            continue;
        }

        let yr = &y_children[y_cnt - right - 1];
        let pr = &p_children[p_cnt - right - 1];
        let mut upd_left = matches!(
            (yc, pc.as_element()),
            (XmlOut::Element(el), Some(n)) if tag_matches(el, n)
        );
        let upd_right = matches!(
            (yr, pr.as_element()),
            (XmlOut::Element(el), Some(n)) if tag_matches(el, n)
        );

        if upd_left && upd_right {
            let (XmlOut::Element(el_l), Some(node_l)) = (yc, pc.as_element()) else {
                unreachable!()
            };
            let (XmlOut::Element(el_r), Some(node_r)) = (yr, pr.as_element()) else {
                unreachable!()
            };
            let (eq_left, mapped_left) = compute_child_equality(txn, el_l, node_l, mapping);
            let (eq_right, mapped_right) = compute_child_equality(txn, el_r, node_r, mapping);
            if mapped_left && !mapped_right {
                // keep left
            } else if !mapped_left && mapped_right {
                upd_left = false;
            } else if eq_left < eq_right {
                upd_left = false;
            }
            // full tie prefers the left side
        }

        if upd_left {
            let (XmlOut::Element(el), Some(n)) = (yc, pc.as_element()) else {
                unreachable!()
            };
            reconcile_container(txn, &ContainerRef::Element(el.clone()), n, mapping)?;
            left += 1;
        } else if upd_right {
            let (XmlOut::Element(el), Some(n)) = (yr, pr.as_element()) else {
                unreachable!()
            };
            reconcile_container(txn, &ContainerRef::Element(el.clone()), n, mapping)?;
            right += 1;
        } else {
            mapping.remove(&xml_branch_id(yc));
            y.remove_range(txn, left as u32, 1);
            build_child(txn, y, left as u32, pc, mapping);
            left += 1;
        }
    }

    // Whatever the scan did not consume is a plain delete / insert.
    let y_rest = y_cnt - left - right;
    if y_rest > 0 {
        for yc in &y_children[left..left + y_rest] {
            mapping.remove(&xml_branch_id(yc));
        }
        y.remove_range(txn, left as u32, y_rest as u32);
    }
    let mut pos = left as u32;
    for pc in &p_children[left..p_cnt - right] {
        build_child(txn, y, pos, pc, mapping);
        pos += 1;
    }
    Ok(())
}

/// Reconcile one CRDT text against a run of editor text nodes: a minimal
/// plain-text splice followed by formatting retains. Format keys present
/// on the CRDT but absent from the target are null-overridden so stale
/// formatting cannot survive on retained ranges.
pub(crate) fn reconcile_text(
    txn: &mut TransactionMut,
    ytext: &XmlTextRef,
    run: &[Node],
    mapping: &mut TypeMapping,
) {
    let chunks = live_text_chunks(&*txn, ytext);
    let mut cur_str = String::new();
    let mut format_keys: HashSet<Arc<str>> = HashSet::new();
    for chunk in &chunks {
        cur_str.push_str(&chunk.insert);
        format_keys.extend(chunk.attrs.keys().cloned());
    }

    let target: Vec<(String, Attrs)> = run
        .iter()
        .map(|node| {
            let mut attrs: Attrs = format_keys
                .iter()
                .map(|k| (k.clone(), Any::Null))
                .collect();
            attrs.extend(marks_to_attrs(node.marks()));
            (node.text().unwrap_or("").to_string(), attrs)
        })
        .collect();
    let target_str: String = target.iter().map(|(text, _)| text.as_str()).collect();

    let (index, remove, insert) = simple_diff(&cur_str, &target_str);
    if remove > 0 {
        ytext.remove_range(txn, index as u32, remove as u32);
    }
    if !insert.is_empty() {
        ytext.insert(txn, index as u32, &insert);
    }

    let mut pos = 0u32;
    for (text, attrs) in target {
        let len = text.len() as u32;
        if len > 0 && !attrs.is_empty() {
            ytext.format(txn, pos, len, attrs);
        }
        pos += len;
    }
    mapping.set_text_run(branch_id_of(ytext), run.to_vec());
}

/// Minimal single-range string diff: longest common prefix and suffix,
/// snapped back to character boundaries. Returns `(index, removed_len,
/// inserted_text)` in byte units.
pub(crate) fn simple_diff(old: &str, new: &str) -> (usize, usize, String) {
    if old == new {
        return (0, 0, String::new());
    }
    let old_b = old.as_bytes();
    let new_b = new.as_bytes();
    let max_prefix = old_b.len().min(new_b.len());

    let mut left = 0;
    while left < max_prefix && old_b[left] == new_b[left] {
        left += 1;
    }
    while left > 0 && (!old.is_char_boundary(left) || !new.is_char_boundary(left)) {
        left -= 1;
    }

    let max_suffix = (old_b.len() - left).min(new_b.len() - left);
    let mut right = 0;
    while right < max_suffix && old_b[old_b.len() - right - 1] == new_b[new_b.len() - right - 1] {
        right += 1;
    }
    while right > 0
        && (!old.is_char_boundary(old_b.len() - right) || !new.is_char_boundary(new_b.len() - right))
    {
        right -= 1;
    }

    (
        left,
        old_b.len() - left - right,
        new[left..new_b.len() - right].to_string(),
    )
}

// ===========================================================================
// Building CRDT subtrees from editor nodes
// ===========================================================================

pub(crate) fn build_child(
    txn: &mut TransactionMut,
    parent: &ContainerRef,
    index: u32,
    child: &NormalizedChild,
    mapping: &mut TypeMapping,
) {
    match child {
        NormalizedChild::Element(node) => {
            build_element(txn, parent, index, node, mapping);
        }
        NormalizedChild::TextRun(run) => {
            build_text_run(txn, parent, index, run, mapping);
        }
    }
}

/// Create a fresh CRDT element mirroring an editor node, recursively.
pub(crate) fn build_element(
    txn: &mut TransactionMut,
    parent: &ContainerRef,
    index: u32,
    node: &Node,
    mapping: &mut TypeMapping,
) -> XmlElementRef {
    let el = parent.insert_element(txn, index, XmlElementPrelim::empty(node.name_arc()));
    for (key, value) in node.attrs() {
        if key.as_ref() != YCHANGE_KEY && *value != Any::Null {
            el.insert_attribute(txn, key.clone(), value.clone());
        }
    }
    let container = ContainerRef::Element(el.clone());
    for (i, child) in normalize_children(node).iter().enumerate() {
        build_child(txn, &container, i as u32, child, mapping);
    }
    mapping.set_element(branch_id_of(&el), node.clone());
    el
}

/// Create a fresh CRDT text mirroring a run of editor text nodes.
pub(crate) fn build_text_run(
    txn: &mut TransactionMut,
    parent: &ContainerRef,
    index: u32,
    run: &[Node],
    mapping: &mut TypeMapping,
) -> XmlTextRef {
    let text = parent.insert_text(txn, index, XmlTextPrelim::new(""));
    let mut pos = 0u32;
    for node in run {
        let chunk = node.text().unwrap_or("");
        if chunk.is_empty() {
            continue;
        }
        let attrs = marks_to_attrs(node.marks());
        if attrs.is_empty() {
            text.insert(txn, pos, chunk);
        } else {
            text.insert_with_attributes(txn, pos, chunk, attrs);
        }
        pos += chunk.len() as u32;
    }
    mapping.set_text_run(branch_id_of(&text), run.to_vec());
    text
}

#[cfg(test)]
mod tests {
    use yrs::{GetString, ReadTxn, Transact, XmlFragment};

    use super::*;
    use crate::binding::materialize::{materialize_fragment, Materializer};
    use crate::test_support::{bold_paragraph, doc_node, heading, paragraph, rich_schema};

    fn fragment_doc() -> (yrs::Doc, yrs::XmlFragmentRef) {
        let doc = yrs::Doc::new();
        let frag = doc.get_or_insert_xml_fragment("pm");
        (doc, frag)
    }

    fn reconcile(
        doc: &yrs::Doc,
        frag: &yrs::XmlFragmentRef,
        editor_doc: &Node,
        mapping: &mut TypeMapping,
    ) {
        let mut txn = doc.transact_mut();
        reconcile_container(
            &mut txn,
            &ContainerRef::Fragment(frag.clone()),
            editor_doc,
            mapping,
        )
        .unwrap();
    }

    #[test]
    fn test_single_paragraph_lands_in_fragment() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let editor_doc = doc_node(&schema, vec![paragraph(&schema, "ab")]);

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);

        let txn = doc.transact();
        assert_eq!(frag.len(&txn), 1);
        let Some(XmlOut::Element(p)) = frag.get(&txn, 0) else {
            panic!("expected an element child");
        };
        assert_eq!(p.tag().to_string(), "paragraph");
        let Some(XmlOut::Text(t)) = p.get(&txn, 0) else {
            panic!("expected a text child");
        };
        assert_eq!(t.get_string(&txn), "ab");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let editor_doc = doc_node(
            &schema,
            vec![paragraph(&schema, "hello"), paragraph(&schema, "world")],
        );

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);
        let sv_before = doc.transact().state_vector();

        reconcile(&doc, &frag, &editor_doc, &mut mapping);
        let sv_after = doc.transact().state_vector();
        assert_eq!(sv_before, sv_after, "second pass must emit zero operations");
    }

    #[test]
    fn test_untouched_sibling_keeps_identity() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let second = paragraph(&schema, "world");
        let editor_doc = doc_node(&schema, vec![paragraph(&schema, "hello"), second.clone()]);

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);
        let second_id = {
            let txn = doc.transact();
            xml_branch_id(&frag.get(&txn, 1).unwrap())
        };

        // replace the first paragraph with a heading, keep the second node
        let editor_doc2 = doc_node(&schema, vec![heading(&schema, 1, "HELLO"), second]);
        reconcile(&doc, &frag, &editor_doc2, &mut mapping);

        let txn = doc.transact();
        assert_eq!(frag.len(&txn), 2);
        let Some(XmlOut::Element(h)) = frag.get(&txn, 0) else {
            panic!("expected heading");
        };
        assert_eq!(h.tag().to_string(), "heading");
        assert_eq!(
            xml_branch_id(&frag.get(&txn, 1).unwrap()),
            second_id,
            "sibling outside the edit must keep its CRDT identity"
        );
    }

    #[test]
    fn test_middle_insert_preserves_neighbors() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let a = paragraph(&schema, "a");
        let b = paragraph(&schema, "b");
        let editor_doc = doc_node(&schema, vec![a.clone(), b.clone()]);

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);
        let (id_a, id_b) = {
            let txn = doc.transact();
            (
                xml_branch_id(&frag.get(&txn, 0).unwrap()),
                xml_branch_id(&frag.get(&txn, 1).unwrap()),
            )
        };

        let editor_doc2 = doc_node(&schema, vec![a, paragraph(&schema, "new"), b]);
        reconcile(&doc, &frag, &editor_doc2, &mut mapping);

        let txn = doc.transact();
        assert_eq!(frag.len(&txn), 3);
        assert_eq!(xml_branch_id(&frag.get(&txn, 0).unwrap()), id_a);
        assert_eq!(xml_branch_id(&frag.get(&txn, 2).unwrap()), id_b);
    }

    #[test]
    fn test_text_edit_keeps_text_identity() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let p1 = paragraph(&schema, "abc");
        let editor_doc = doc_node(&schema, vec![p1]);

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);
        let text_id = {
            let txn = doc.transact();
            let Some(XmlOut::Element(p)) = frag.get(&txn, 0) else {
                panic!()
            };
            xml_branch_id(&p.get(&txn, 0).unwrap())
        };

        let editor_doc2 = doc_node(&schema, vec![paragraph(&schema, "axbc")]);
        reconcile(&doc, &frag, &editor_doc2, &mut mapping);

        let txn = doc.transact();
        let Some(XmlOut::Element(p)) = frag.get(&txn, 0) else {
            panic!()
        };
        let Some(XmlOut::Text(t)) = p.get(&txn, 0) else {
            panic!()
        };
        assert_eq!(t.get_string(&txn), "axbc");
        assert_eq!(xml_branch_id(&p.get(&txn, 0).unwrap()), text_id);
    }

    #[test]
    fn test_marks_written_and_cleared() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();

        let bold_doc = doc_node(&schema, vec![bold_paragraph(&schema, "hot", "")]);
        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &bold_doc, &mut mapping);
        {
            let txn = doc.transact();
            let Some(XmlOut::Element(p)) = frag.get(&txn, 0) else {
                panic!()
            };
            let Some(XmlOut::Text(t)) = p.get(&txn, 0) else {
                panic!()
            };
            let chunks = live_text_chunks(&txn, &t);
            assert_eq!(chunks.len(), 1);
            assert!(chunks[0].attrs.contains_key("bold"));
        }

        // removing the mark clears the format on the retained range
        let plain_doc = doc_node(&schema, vec![paragraph(&schema, "hot")]);
        reconcile(&doc, &frag, &plain_doc, &mut mapping);
        {
            let txn = doc.transact();
            let Some(XmlOut::Element(p)) = frag.get(&txn, 0) else {
                panic!()
            };
            let Some(XmlOut::Text(t)) = p.get(&txn, 0) else {
                panic!()
            };
            let chunks = live_text_chunks(&txn, &t);
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].insert, "hot");
            assert!(chunks[0].attrs.is_empty(), "bold must be cleared");
        }
    }

    #[test]
    fn test_attribute_update() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let editor_doc = doc_node(&schema, vec![heading(&schema, 2, "t")]);
        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);

        let editor_doc2 = doc_node(&schema, vec![heading(&schema, 3, "t")]);
        reconcile(&doc, &frag, &editor_doc2, &mut mapping);
        {
            let txn = doc.transact();
            let Some(XmlOut::Element(h)) = frag.get(&txn, 0) else {
                panic!()
            };
            assert_eq!(
                crate::binding::xml::read_attribute(&h, &txn, "level"),
                Some(Any::BigInt(3))
            );
        }
    }

    #[test]
    fn test_roundtrip_build_then_materialize() {
        let schema = rich_schema();
        let (doc, frag) = fragment_doc();
        let editor_doc = doc_node(
            &schema,
            vec![
                heading(&schema, 2, "title"),
                paragraph(&schema, "body"),
                bold_paragraph(&schema, "strong", ""),
            ],
        );

        let mut mapping = TypeMapping::new();
        reconcile(&doc, &frag, &editor_doc, &mut mapping);

        let mut fresh = TypeMapping::new();
        let mut m = Materializer::new(&schema, &mut fresh);
        let txn = doc.transact();
        let children = materialize_fragment(&txn, &frag, None, None, &mut m);
        let rebuilt = schema
            .node("doc", Default::default(), children)
            .unwrap();
        assert_eq!(rebuilt, editor_doc, "materialize(build(p)) must equal p");
    }

    #[test]
    fn test_simple_diff_basics() {
        assert_eq!(simple_diff("abc", "abc"), (0, 0, String::new()));
        assert_eq!(simple_diff("abc", "axbc"), (1, 0, "x".to_string()));
        assert_eq!(simple_diff("axbc", "abc"), (1, 1, String::new()));
        assert_eq!(simple_diff("", "ab"), (0, 0, "ab".to_string()));
        assert_eq!(simple_diff("ab", ""), (0, 2, String::new()));
        assert_eq!(simple_diff("aaa", "aba"), (1, 1, "b".to_string()));
    }

    #[test]
    fn test_simple_diff_respects_char_boundaries() {
        // é (2 bytes) vs è (2 bytes) share the first byte; the diff must
        // not split inside the code point
        let (index, remove, insert) = simple_diff("é", "è");
        assert_eq!(index, 0);
        assert_eq!(remove, 2);
        assert_eq!(insert, "è");
    }

    #[test]
    fn test_equal_attrs_ignores_null_and_ychange() {
        let mut a = Attrs::new();
        a.insert("level".into(), Any::BigInt(1));
        a.insert("gone".into(), Any::Null);
        a.insert(YCHANGE_KEY.into(), Any::from("x"));
        let mut b = Attrs::new();
        b.insert("level".into(), Any::BigInt(1));
        assert!(equal_attrs(&a, &b));

        b.insert("level".into(), Any::BigInt(2));
        assert!(!equal_attrs(&a, &b));
    }

    #[test]
    fn test_normalize_collapses_text_runs() {
        let schema = rich_schema();
        let text1 = schema.text("a", vec![]).unwrap();
        let text2 = schema.text("b", vec![]).unwrap();
        let p = schema
            .node("paragraph", Default::default(), vec![text1, text2])
            .unwrap();
        let normalized = normalize_children(&p);
        assert_eq!(normalized.len(), 1);
        assert!(matches!(&normalized[0], NormalizedChild::TextRun(run) if run.len() == 2));
    }
}
