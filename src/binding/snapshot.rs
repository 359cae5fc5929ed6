//! Historical snapshot rendering support.
//!
//! A snapshot pair `(snapshot, prev_snapshot)` bounds a diff: content
//! inserted between the two renders with an `added` annotation, content
//! deleted between the two stays visible and renders `removed`. The trick
//! is the hybrid restore: the document state is re-encoded with the *new*
//! snapshot's state vector but the *old* snapshot's delete set, so
//! removed content is still alive in the restored tree, then every item
//! is classified against the real pair.
//!
//! Requires documents created with garbage collection disabled
//! (`skip_gc`), as usual for CRDT version viewing.

use std::cell::RefCell;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use yrs::block::ID;
use yrs::branch::BranchID;
use yrs::types::text::{ChangeKind, YChange};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::{Encoder, EncoderV1};
use yrs::{
    Any, DeleteSet, Doc, Options, ReadTxn, Snapshot, StateVector, Text, Transact, TransactionMut,
    Update, XmlFragmentRef, XmlOut,
};

use super::materialize::{default_change, diff_to_chunk, HistoricalDeltas};
use super::users::PermanentUserData;
use super::xml::{branch_id_of, ContainerRef};
use crate::error::{BridgeError, Result};

/// A light/dark color pair used for author annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPair {
    /// Background-suitable translucent variant.
    pub light: String,
    /// Opaque accent variant.
    pub dark: String,
}

impl ColorPair {
    /// Create a pair from two CSS color strings.
    pub fn new(light: impl Into<String>, dark: impl Into<String>) -> Self {
        Self {
            light: light.into(),
            dark: dark.into(),
        }
    }
}

/// The default single-entry amber palette.
pub(crate) fn default_palette() -> Vec<ColorPair> {
    vec![ColorPair::new("#ecd44433", "#ecd444")]
}

/// Assigns palette colors to authors. While fewer authors than palette
/// entries exist, picks uniformly among unused entries; afterwards picks
/// uniformly from the whole palette. The RNG is injected so tests can be
/// deterministic.
pub(crate) struct ColorAllocator {
    palette: Vec<ColorPair>,
    assigned: HashMap<String, ColorPair>,
    rng: Box<dyn RngCore + Send>,
}

impl ColorAllocator {
    pub(crate) fn new(
        palette: Vec<ColorPair>,
        assigned: HashMap<String, ColorPair>,
        rng: Option<Box<dyn RngCore + Send>>,
    ) -> Self {
        let palette = if palette.is_empty() {
            default_palette()
        } else {
            palette
        };
        Self {
            palette,
            assigned,
            rng: rng.unwrap_or_else(|| Box::new(StdRng::from_os_rng())),
        }
    }

    pub(crate) fn color_for(&mut self, user: &str) -> ColorPair {
        if let Some(color) = self.assigned.get(user) {
            return color.clone();
        }
        let pool: Vec<&ColorPair> = if self.assigned.len() < self.palette.len() {
            let unused: Vec<&ColorPair> = self
                .palette
                .iter()
                .filter(|c| !self.assigned.values().any(|used| used == *c))
                .collect();
            if unused.is_empty() {
                self.palette.iter().collect()
            } else {
                unused
            }
        } else {
            self.palette.iter().collect()
        };
        let pick = pool[self.rng.random_range(0..pool.len())].clone();
        self.assigned.insert(user.to_string(), pick.clone());
        pick
    }
}

/// The empty snapshot: nothing seen, nothing deleted. Used as baseline
/// when a render is requested without a previous snapshot.
pub(crate) fn empty_snapshot() -> Snapshot {
    Snapshot::new(StateVector::default(), DeleteSet::default())
}

/// Restore a document at the hybrid state `(prev.delete_set,
/// snapshot.state_map)` into a fresh gc-disabled doc, returning it with
/// the counterpart of the given root fragment.
pub(crate) fn restore_historical(
    doc: &Doc,
    fragment: &XmlFragmentRef,
    snapshot: &Snapshot,
    prev: &Snapshot,
) -> Result<(Doc, XmlFragmentRef)> {
    let name = match branch_id_of(fragment) {
        BranchID::Root(name) => name,
        BranchID::Nested(_) => {
            return Err(BridgeError::Snapshot(
                "only root-level fragments can be rendered historically".to_string(),
            ));
        }
    };

    let hybrid = Snapshot::new(snapshot.state_map.clone(), prev.delete_set.clone());
    let update = {
        let mut txn = doc.transact_mut();
        let mut encoder = EncoderV1::new();
        txn.encode_state_from_snapshot(&hybrid, &mut encoder)
            .map_err(|e| BridgeError::Snapshot(e.to_string()))?;
        encoder.to_vec()
    };

    let mut options = Options::default();
    options.skip_gc = true;
    let restored = Doc::with_options(options);
    let restored_fragment = restored.get_or_insert_xml_fragment(name);
    {
        let decoded =
            Update::decode_v1(&update).map_err(|e| BridgeError::Snapshot(e.to_string()))?;
        let mut txn = restored.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| BridgeError::Snapshot(e.to_string()))?;
    }
    Ok((restored, restored_fragment))
}

/// Walk a restored tree and compute every text's delta under the snapshot
/// pair. Deltas need a write transaction (`diff_range`), the later
/// materialization walk only a read transaction — hence the pre-pass.
pub(crate) fn collect_historical_deltas(
    restored: &Doc,
    fragment: &XmlFragmentRef,
    snapshot: &Snapshot,
    prev: &Snapshot,
    resolve: &dyn Fn(ChangeKind, ID) -> Any,
) -> HistoricalDeltas {
    let mut deltas = HistoricalDeltas::new();
    let mut txn = restored.transact_mut();
    collect_container(
        &mut txn,
        &ContainerRef::Fragment(fragment.clone()),
        snapshot,
        prev,
        resolve,
        &mut deltas,
    );
    deltas
}

fn collect_container(
    txn: &mut TransactionMut,
    container: &ContainerRef,
    snapshot: &Snapshot,
    prev: &Snapshot,
    resolve: &dyn Fn(ChangeKind, ID) -> Any,
    deltas: &mut HistoricalDeltas,
) {
    for child in container.children(&*txn) {
        match child {
            XmlOut::Text(text) => {
                let chunks = text
                    .diff_range(txn, Some(snapshot), Some(prev), |change: YChange| {
                        resolve(change.kind, change.id)
                    })
                    .into_iter()
                    .filter_map(diff_to_chunk)
                    .collect();
                deltas.insert(branch_id_of(&text), chunks);
            }
            XmlOut::Element(el) => {
                collect_container(
                    txn,
                    &ContainerRef::Element(el),
                    snapshot,
                    prev,
                    resolve,
                    deltas,
                );
            }
            XmlOut::Fragment(_) => {}
        }
    }
}

/// Build the `ychange` resolver for one render pass: author lookup via
/// permanent user data (when configured) and color assignment through the
/// shared allocator.
pub(crate) fn change_resolver<'a>(
    doc: &'a Doc,
    user_data: Option<&'a PermanentUserData>,
    colors: &'a RefCell<ColorAllocator>,
) -> impl Fn(ChangeKind, ID) -> Any + 'a {
    move |kind, id| {
        let Some(user_data) = user_data else {
            return default_change(kind);
        };
        let user = {
            let txn = doc.transact();
            match kind {
                ChangeKind::Added => user_data.user_by_client_id(&txn, id.client),
                ChangeKind::Removed => user_data.user_by_deleted_id(&txn, &id),
            }
        };

        let kind_str = match kind {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
        };
        let mut map: HashMap<String, Any> = HashMap::new();
        map.insert("type".to_string(), Any::from(kind_str));
        if let Some(user) = user {
            let color = colors.borrow_mut().color_for(&user);
            let mut color_map: HashMap<String, Any> = HashMap::new();
            color_map.insert("light".to_string(), Any::from(color.light.clone()));
            color_map.insert("dark".to_string(), Any::from(color.dark.clone()));
            map.insert("color".to_string(), Any::from(color_map));
            map.insert("user".to_string(), Any::from(user));
        }
        Any::from(map)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use yrs::{GetString, ReadTxn, XmlFragment, XmlElementPrelim, XmlTextPrelim};

    use super::*;

    fn seeded() -> Option<Box<dyn RngCore + Send>> {
        Some(Box::new(StdRng::seed_from_u64(42)))
    }

    fn two_colors() -> Vec<ColorPair> {
        vec![
            ColorPair::new("#aaa1", "#aaa"),
            ColorPair::new("#bbb1", "#bbb"),
        ]
    }

    #[test]
    fn test_color_allocation_is_stable_per_user() {
        let mut alloc = ColorAllocator::new(two_colors(), HashMap::new(), seeded());
        let first = alloc.color_for("alice");
        assert_eq!(alloc.color_for("alice"), first);
    }

    #[test]
    fn test_distinct_users_get_unused_colors_first() {
        let mut alloc = ColorAllocator::new(two_colors(), HashMap::new(), seeded());
        let a = alloc.color_for("alice");
        let b = alloc.color_for("bob");
        assert_ne!(a, b, "while unused colors remain, users must differ");
        // palette exhausted: the third user draws from the full palette
        let c = alloc.color_for("carol");
        assert!(two_colors().contains(&c));
    }

    #[test]
    fn test_preseeded_mapping_wins() {
        let mut preset = HashMap::new();
        preset.insert("alice".to_string(), ColorPair::new("#fff1", "#fff"));
        let mut alloc = ColorAllocator::new(two_colors(), preset, seeded());
        assert_eq!(alloc.color_for("alice"), ColorPair::new("#fff1", "#fff"));
    }

    fn gc_free_doc() -> Doc {
        let mut options = Options::default();
        options.skip_gc = true;
        Doc::with_options(options)
    }

    #[test]
    fn test_restore_at_earlier_snapshot() {
        let doc = gc_free_doc();
        let frag = doc.get_or_insert_xml_fragment("pm");
        let text = {
            let mut txn = doc.transact_mut();
            let p = frag.insert(&mut txn, 0, XmlElementPrelim::empty("paragraph"));
            p.insert(&mut txn, 0, XmlTextPrelim::new("ab"))
        };
        let s1 = doc.transact().snapshot();
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 2, "c");
        }

        let (restored, rfrag) = restore_historical(&doc, &frag, &s1, &empty_snapshot()).unwrap();
        let txn = restored.transact();
        let Some(XmlOut::Element(p)) = rfrag.get(&txn, 0) else {
            panic!("paragraph missing in restored doc");
        };
        let Some(XmlOut::Text(t)) = p.get(&txn, 0) else {
            panic!("text missing in restored doc");
        };
        assert_eq!(t.get_string(&txn), "ab");
    }

    #[test]
    fn test_removed_text_stays_visible_and_is_classified() {
        let doc = gc_free_doc();
        let frag = doc.get_or_insert_xml_fragment("pm");
        let text = {
            let mut txn = doc.transact_mut();
            let p = frag.insert(&mut txn, 0, XmlElementPrelim::empty("paragraph"));
            p.insert(&mut txn, 0, XmlTextPrelim::new("ab"))
        };
        let s1 = doc.transact().snapshot();
        {
            let mut txn = doc.transact_mut();
            text.remove_range(&mut txn, 1, 1); // delete "b"
        }
        let s2 = doc.transact().snapshot();

        let (restored, rfrag) = restore_historical(&doc, &frag, &s2, &s1).unwrap();
        let resolve = |kind: ChangeKind, _id: ID| default_change(kind);
        let deltas = collect_historical_deltas(&restored, &rfrag, &s2, &s1, &resolve);

        let chunks: Vec<_> = deltas.values().next().unwrap().clone();
        let full: String = chunks.iter().map(|c| c.insert.as_str()).collect();
        assert_eq!(full, "ab", "deleted content must stay visible");
        let removed = chunks
            .iter()
            .find(|c| c.ychange.is_some())
            .expect("one run must carry a change annotation");
        assert_eq!(removed.insert, "b");
    }
}
