//! CRDT → editor materialization.
//!
//! Builds editor subtrees out of CRDT subtrees, reusing identity through
//! the mapping wherever a CRDT node is unchanged. Under a snapshot pair the
//! same walk runs against a document restored at the historical state and
//! injects `ychange` annotations for added/removed content.
//!
//! # Self-healing
//!
//! Schema rejection is not an error path here: a concurrent remote edit can
//! always produce a subtree this replica's schema refuses. The offending
//! CRDT node is scheduled for deletion (see [`PendingRemoval`]) and a
//! `None` propagates upward, which the parent filters out of its child
//! list. Replicating that deletion converges all peers onto the
//! locally-valid intersection of their schemas.

use std::collections::HashMap;

use tracing::warn;
use yrs::block::ID;
use yrs::branch::BranchID;
use yrs::types::text::{ChangeKind, Diff, YChange};
use yrs::types::Attrs;
use yrs::{Any, Out, ReadTxn, Snapshot, Text, XmlElementRef, XmlOut, XmlTextRef};

use super::mapping::{MappedNode, TypeMapping};
use super::xml::{any_to_attrs, branch_id_of, read_attributes, ContainerRef};
use crate::editor::{Mark, Node, Schema};
use crate::error::BridgeError;

/// Attribute / mark name carrying snapshot change annotations.
pub const YCHANGE_KEY: &str = "ychange";

/// Resolver turning an added/removed classification into the `ychange`
/// annotation value (author and color are looked up here when permanent
/// user data is configured).
pub(crate) type ChangeResolver<'a> = &'a dyn Fn(ChangeKind, ID) -> Any;

/// A CRDT node whose materialization was rejected by the schema, queued
/// for deletion from its parent.
#[derive(Debug, Clone)]
pub(crate) struct PendingRemoval {
    pub parent: ContainerRef,
    pub child: BranchID,
}

/// One run of a text delta, normalized out of the CRDT's diff shape.
#[derive(Debug, Clone)]
pub(crate) struct TextChunk {
    pub insert: String,
    pub attrs: Attrs,
    pub ychange: Option<Any>,
}

/// Pre-extracted historical text deltas, keyed by text branch id. Only
/// present during snapshot rendering, where deltas must be computed with a
/// write transaction before the read-only walk starts.
pub(crate) type HistoricalDeltas = HashMap<BranchID, Vec<TextChunk>>;

/// Shared state of one materialization pass.
pub(crate) struct Materializer<'a> {
    pub schema: &'a Schema,
    pub mapping: &'a mut TypeMapping,
    pub resolve_change: Option<ChangeResolver<'a>>,
    pub historical: Option<&'a HistoricalDeltas>,
    pub rejected: Vec<PendingRemoval>,
    pub fatal: Option<BridgeError>,
}

impl<'a> Materializer<'a> {
    pub(crate) fn new(schema: &'a Schema, mapping: &'a mut TypeMapping) -> Self {
        Self {
            schema,
            mapping,
            resolve_change: None,
            historical: None,
            rejected: Vec::new(),
            fatal: None,
        }
    }

    fn change_value(&self, kind: ChangeKind, id: ID) -> Any {
        match self.resolve_change {
            Some(resolve) => resolve(kind, id),
            None => default_change(kind),
        }
    }
}

/// The `ychange` value used when no user-data resolver is configured.
pub(crate) fn default_change(kind: ChangeKind) -> Any {
    let kind = match kind {
        ChangeKind::Added => "added",
        ChangeKind::Removed => "removed",
    };
    let mut map = HashMap::new();
    map.insert("type".to_string(), Any::from(kind));
    Any::from(map)
}

/// Visibility of an item under a snapshot: inserted before the snapshot's
/// state vector and not covered by its delete set. Root types (the
/// fragment itself) are always visible.
pub(crate) fn is_visible(id: Option<&ID>, snapshot: Option<&Snapshot>) -> bool {
    match (id, snapshot) {
        (_, None) | (None, Some(_)) => true,
        (Some(id), Some(snap)) => {
            snap.state_map.get(&id.client) > id.clock && !snap.delete_set.is_deleted(id)
        }
    }
}

fn nested_id(id: &BranchID) -> Option<ID> {
    match id {
        BranchID::Nested(item_id) => Some(*item_id),
        BranchID::Root(_) => None,
    }
}

/// Materialize the children of a container, filtering rejected subtrees
/// and recording them for deletion.
pub(crate) fn materialize_children<T: ReadTxn>(
    txn: &T,
    container: &ContainerRef,
    snapshot: Option<&Snapshot>,
    prev_snapshot: Option<&Snapshot>,
    m: &mut Materializer<'_>,
) -> Vec<Node> {
    let mut out = Vec::new();
    for child in container.children(txn) {
        if m.fatal.is_some() {
            break;
        }
        match child {
            XmlOut::Element(el) => {
                match materialize_element(txn, &el, snapshot, prev_snapshot, m) {
                    Some(node) => out.push(node),
                    None => {
                        if m.fatal.is_none() {
                            m.rejected.push(PendingRemoval {
                                parent: container.clone(),
                                child: branch_id_of(&el),
                            });
                        }
                    }
                }
            }
            XmlOut::Text(text) => match materialize_text(txn, &text, snapshot, prev_snapshot, m) {
                Some(run) => out.extend(run),
                None => m.rejected.push(PendingRemoval {
                    parent: container.clone(),
                    child: branch_id_of(&text),
                }),
            },
            XmlOut::Fragment(_) => {
                m.fatal = Some(BridgeError::UnsupportedNodeKind);
            }
        }
    }
    out
}

/// Materialize one CRDT element into an editor node.
///
/// Returns the cached counterpart unchanged when the mapping already has
/// one; `None` when the schema rejected the subtree (self-healing) or a
/// fatal condition was recorded on the materializer.
pub(crate) fn materialize_element<T: ReadTxn>(
    txn: &T,
    el: &XmlElementRef,
    snapshot: Option<&Snapshot>,
    prev_snapshot: Option<&Snapshot>,
    m: &mut Materializer<'_>,
) -> Option<Node> {
    let id = branch_id_of(el);
    if let Some(MappedNode::Element(cached)) = m.mapping.get(&id) {
        return Some(cached.clone());
    }

    // Annotated elements stop re-annotation of their descendants by
    // narrowing the comparison window to the snapshot itself.
    let item_id = nested_id(&id);
    let mut change: Option<Any> = None;
    let mut child_prev = prev_snapshot;
    if let (Some(snap), Some(_prev)) = (snapshot, prev_snapshot) {
        if !is_visible(item_id.as_ref(), snapshot) {
            change = item_id.map(|iid| m.change_value(ChangeKind::Removed, iid));
            child_prev = Some(snap);
        } else if !is_visible(item_id.as_ref(), prev_snapshot) {
            change = item_id.map(|iid| m.change_value(ChangeKind::Added, iid));
            child_prev = Some(snap);
        }
    }

    let container = ContainerRef::Element(el.clone());
    let children = materialize_children(txn, &container, snapshot, child_prev, m);
    if m.fatal.is_some() {
        return None;
    }

    let mut attrs = read_attributes(el, txn);
    if let Some(change) = change {
        attrs.insert(YCHANGE_KEY.into(), change);
    }

    let tag = el.tag().to_string();
    match m.schema.node(&tag, attrs, children) {
        Ok(node) => {
            m.mapping.set_element(id, node.clone());
            Some(node)
        }
        Err(err) => {
            warn!(element = %tag, %err, "schema rejected element, scheduling removal");
            None
        }
    }
}

/// Materialize a CRDT text into its run of inline editor text nodes.
pub(crate) fn materialize_text<T: ReadTxn>(
    txn: &T,
    text: &XmlTextRef,
    _snapshot: Option<&Snapshot>,
    _prev_snapshot: Option<&Snapshot>,
    m: &mut Materializer<'_>,
) -> Option<Vec<Node>> {
    let id = branch_id_of(text);
    let chunks = match m.historical {
        Some(deltas) => deltas.get(&id).cloned().unwrap_or_default(),
        None => live_text_chunks(txn, text),
    };

    let mut run = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        match chunk_to_node(m.schema, chunk) {
            Ok(node) => run.push(node),
            Err(err) => {
                warn!(%err, "schema rejected text run, scheduling removal");
                return None;
            }
        }
    }
    m.mapping.set_text_run(id, run.clone());
    Some(run)
}

fn chunk_to_node(schema: &Schema, chunk: &TextChunk) -> crate::error::Result<Node> {
    let mut marks = Vec::with_capacity(chunk.attrs.len() + 1);
    for (name, value) in &chunk.attrs {
        marks.push(schema.mark(name, any_to_attrs(value))?);
    }
    if let Some(change) = &chunk.ychange {
        marks.push(schema.mark(YCHANGE_KEY, any_to_attrs(change))?);
    }
    marks.sort_by(|a, b| a.name().cmp(b.name()));
    schema.text(chunk.insert.clone(), marks)
}

/// Current text delta of a live (non-snapshot) CRDT text.
pub(crate) fn live_text_chunks<T: ReadTxn>(txn: &T, text: &XmlTextRef) -> Vec<TextChunk> {
    text.diff(txn, |_change: YChange| Any::Null)
        .into_iter()
        .filter_map(diff_to_chunk)
        .collect()
}

/// Normalize one `yrs` diff entry. Non-string inserts (embeds) have no
/// editor counterpart and are dropped.
pub(crate) fn diff_to_chunk(diff: Diff<Any>) -> Option<TextChunk> {
    match diff.insert {
        Out::Any(Any::String(s)) => Some(TextChunk {
            insert: s.to_string(),
            attrs: diff.attributes.map(|a| *a).unwrap_or_default(),
            ychange: diff.ychange.filter(|y| *y != Any::Null),
        }),
        _ => None,
    }
}

/// Build a full editor child list from a fragment.
pub(crate) fn materialize_fragment<T: ReadTxn>(
    txn: &T,
    fragment: &yrs::XmlFragmentRef,
    snapshot: Option<&Snapshot>,
    prev_snapshot: Option<&Snapshot>,
    m: &mut Materializer<'_>,
) -> Vec<Node> {
    materialize_children(
        txn,
        &ContainerRef::Fragment(fragment.clone()),
        snapshot,
        prev_snapshot,
        m,
    )
}

/// Marks of a text node expressed as delta attributes, excluding any
/// change annotation.
pub(crate) fn marks_to_attrs(marks: &[Mark]) -> Attrs {
    let mut attrs = Attrs::new();
    for mark in marks {
        if mark.name() != YCHANGE_KEY {
            attrs.insert(
                std::sync::Arc::from(mark.name()),
                super::xml::attrs_to_any(mark.attrs()),
            );
        }
    }
    attrs
}
