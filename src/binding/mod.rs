//! Bidirectional binding between an editor view and a CRDT XML fragment.
//!
//! The controller owns the identity map, the re-entrancy gate and the two
//! event subscriptions. Local editor transactions are reconciled into the
//! CRDT as minimal mutations; remote CRDT transactions are translated
//! into a single replacement transaction on the editor, tagged as
//! change-origin so downstream listeners can tell the two apart.
//!
//! # Deferred commands
//!
//! The CRDT's deep observer runs while the originating transaction is
//! still committing, so no new document transaction may be opened inside
//! it. Work discovered there that needs one — self-healing deletions,
//! selection re-capture, snapshot re-renders — is queued and drained when
//! the current entry point unwinds (every public method drains on entry
//! and exit). The contract is the usual "run after the current
//! synchronous work unwinds".
//!
//! # Echo suppression
//!
//! Every entry point that mutates either side runs inside the gate; work
//! arriving while the gate is held is dropped, never queued. A change we
//! wrote into the CRDT is observed by our own deep observer *during* the
//! gated section and therefore never translated back.

mod gate;
mod mapping;
mod materialize;
mod position;
mod reconcile;
mod snapshot;
mod users;
mod xml;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tracing::{debug, error, warn};
use yrs::branch::BranchID;
use yrs::types::{Event, Events};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    DeepObservable, Doc, ReadTxn, Snapshot, StateVector, Subscription, Transact, TransactionMut,
    Update, XmlFragment, XmlFragmentRef,
};

use crate::editor::{EditorState, EditorView, SnapshotMeta, Transaction};
use crate::error::{BridgeError, Result};

use gate::ReentrancyGate;
use materialize::{materialize_fragment, Materializer, PendingRemoval};
use position::{capture_selection, restore_selection, RelativeSelection};
use reconcile::reconcile_container;
use snapshot::{
    change_resolver, collect_historical_deltas, default_palette, empty_snapshot,
    restore_historical, ColorAllocator,
};
use xml::{branch_id_of, xml_branch_id, ContainerRef};

pub use mapping::{MappedNode, TypeMapping};
pub use materialize::YCHANGE_KEY;
pub use position::{absolute_to_relative, relative_to_absolute};
pub use snapshot::ColorPair;
pub use users::PermanentUserData;

/// Origin tag on every CRDT transaction this binding opens.
pub const BINDING_ORIGIN: &str = "ybridge";

/// Configuration of a [`FragmentBinding`].
pub struct BindingConfig {
    /// Palette used for author annotations in snapshot renders.
    pub colors: Vec<ColorPair>,
    /// Preseeded author → color assignments.
    pub color_mapping: HashMap<String, ColorPair>,
    /// Author identity service. Without it, change annotations carry only
    /// their kind.
    pub permanent_user_data: Option<PermanentUserData>,
    /// Randomness source for color allocation; injectable for
    /// deterministic tests.
    pub rng: Option<Box<dyn RngCore + Send>>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            colors: default_palette(),
            color_mapping: HashMap::new(),
            permanent_user_data: None,
            rng: None,
        }
    }
}

enum Command {
    RenderSnapshot {
        snapshot: Snapshot,
        prev: Option<Snapshot>,
    },
    UnrenderSnapshot,
    ForceRerender,
    FlushHealing,
    CaptureSelection,
}

struct BindingState {
    mapping: TypeMapping,
    snapshot: Option<Snapshot>,
    prev_snapshot: Option<Snapshot>,
    relative: Option<RelativeSelection>,
    had_content: bool,
    pending_removals: Vec<PendingRemoval>,
    colors: Option<ColorAllocator>,
    user_data: Option<PermanentUserData>,
    fragment_sub: Option<Subscription>,
    view_listener: Option<crate::editor::ListenerId>,
    destroyed: bool,
}

struct BindingShared {
    doc: Doc,
    fragment: XmlFragmentRef,
    view: EditorView,
    gate: ReentrancyGate,
    state: Mutex<BindingState>,
    queue: Mutex<VecDeque<Command>>,
    draining: AtomicBool,
}

/// The binding. Dropping it does not detach the observers; call
/// [`FragmentBinding::destroy`] to tear down cleanly.
pub struct FragmentBinding {
    shared: Arc<BindingShared>,
}

impl FragmentBinding {
    /// Bind an editor view to a CRDT fragment.
    ///
    /// Subscribes to the fragment's deep observer and the view's update
    /// listener. If the fragment already has content, the editor document
    /// is replaced by its materialization right away.
    pub fn new(
        doc: Doc,
        fragment: XmlFragmentRef,
        view: EditorView,
        config: BindingConfig,
    ) -> Self {
        let shared = Arc::new(BindingShared {
            doc,
            fragment,
            view: view.clone(),
            gate: ReentrancyGate::new(),
            state: Mutex::new(BindingState {
                mapping: TypeMapping::new(),
                snapshot: None,
                prev_snapshot: None,
                relative: None,
                had_content: false,
                pending_removals: Vec::new(),
                colors: Some(ColorAllocator::new(
                    config.colors,
                    config.color_mapping,
                    config.rng,
                )),
                user_data: config.permanent_user_data,
                fragment_sub: None,
                view_listener: None,
                destroyed: false,
            }),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        let sub = shared.fragment.observe_deep(move |txn, events| {
            if let Some(shared) = weak.upgrade() {
                shared.on_crdt_events(txn, events);
            }
        });
        let weak = Arc::downgrade(&shared);
        let listener = view.on_update(Arc::new(move |tr, state| {
            if let Some(shared) = weak.upgrade() {
                shared.on_editor_update(tr, state);
                // A held gate means this dispatch came out of a
                // translation, possibly while a CRDT transaction is still
                // committing — deferred work must wait for that entry
                // point to unwind.
                if !shared.gate.is_held() {
                    let _ = shared.drain();
                }
            }
        }));
        {
            let mut st = shared.state.lock().unwrap();
            st.fragment_sub = Some(sub);
            st.view_listener = Some(listener);
        }

        let has_content = {
            let txn = shared.doc.transact();
            shared.fragment.len(&txn) > 0
        };
        if has_content {
            if let Err(err) = shared.render_live(false, false) {
                error!(%err, "initial render failed");
            }
        } else {
            shared.enqueue(Command::CaptureSelection);
        }
        let _ = shared.drain();

        Self { shared }
    }

    /// The CRDT document this binding writes into.
    pub fn doc(&self) -> &Doc {
        &self.shared.doc
    }

    /// The bound root fragment.
    pub fn fragment(&self) -> &XmlFragmentRef {
        &self.shared.fragment
    }

    /// The bound editor view.
    pub fn view(&self) -> &EditorView {
        &self.shared.view
    }

    /// Read-only access to the identity map.
    pub fn with_mapping<R>(&self, f: impl FnOnce(&TypeMapping) -> R) -> R {
        let st = self.shared.state.lock().unwrap();
        f(&st.mapping)
    }

    /// Render a historical view between two snapshots. While a snapshot
    /// is active the editor is read-only and local edits are suppressed.
    ///
    /// The render is deferred: it runs after the current synchronous work
    /// unwinds (immediately, when called from host code).
    pub fn render_snapshot(&self, snapshot: Snapshot, prev: Option<Snapshot>) -> Result<()> {
        self.check_alive()?;
        self.shared
            .enqueue(Command::RenderSnapshot { snapshot, prev });
        self.shared.drain()
    }

    /// Leave the historical view and rebuild the editor from the live
    /// document.
    pub fn unrender_snapshot(&self) -> Result<()> {
        self.check_alive()?;
        self.shared.enqueue(Command::UnrenderSnapshot);
        self.shared.drain()
    }

    /// Drop the identity map and rebuild the editor document from
    /// scratch. Re-renders the active snapshot if one is set.
    pub fn force_rerender(&self) -> Result<()> {
        self.check_alive()?;
        self.shared.enqueue(Command::ForceRerender);
        self.shared.drain()
    }

    /// Run any deferred work (self-healing deletions, selection capture,
    /// queued renders). Called automatically by the other entry points;
    /// hosts that mutate the document through their own transactions can
    /// call it to avoid waiting for the next entry.
    pub fn flush_pending(&self) -> Result<()> {
        self.check_alive()?;
        self.shared.drain()
    }

    /// Apply a remote update to the document. Translation into the editor
    /// happens through the regular observer path, inside this call.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<()> {
        self.check_alive()?;
        let decoded =
            Update::decode_v1(update).map_err(|e| BridgeError::Crdt(e.to_string()))?;
        {
            let mut txn = self.shared.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| BridgeError::Crdt(e.to_string()))?;
        }
        self.shared.drain()
    }

    /// Encode the document's current state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.shared.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode an update covering everything a peer with the given state
    /// vector is missing (everything, when `None`).
    pub fn encode_update_since(&self, remote_state_vector: Option<&[u8]>) -> Result<Vec<u8>> {
        let sv = match remote_state_vector {
            Some(bytes) => StateVector::decode_v1(bytes)
                .map_err(|e| BridgeError::Crdt(format!("failed to decode state vector: {e}")))?,
            None => StateVector::default(),
        };
        let txn = self.shared.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Detach from both event sources and drop all cached state. The
    /// binding refuses further work afterwards.
    pub fn destroy(&self) {
        let mut st = self.shared.state.lock().unwrap();
        st.destroyed = true;
        st.fragment_sub = None;
        if let Some(listener) = st.view_listener.take() {
            self.shared.view.remove_listener(listener);
        }
        st.mapping.clear();
        st.pending_removals.clear();
        st.relative = None;
        drop(st);
        self.shared.queue.lock().unwrap().clear();
    }

    fn check_alive(&self) -> Result<()> {
        if self.shared.state.lock().unwrap().destroyed {
            Err(BridgeError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl BindingShared {
    // ==================== Editor → CRDT ====================

    fn on_editor_update(&self, tr: &Transaction, state: &EditorState) {
        if tr.is_change_origin() {
            return;
        }
        let Some(_guard) = self.gate.try_enter() else {
            // our own translation is committing; this is the echo
            return;
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return;
        }
        if st.snapshot.is_some() {
            debug!("local edit suppressed while a snapshot is rendered");
            return;
        }
        let content_size = state.doc().content_size();
        if !st.had_content && content_size <= 2 {
            // The schema always contains one empty block; translating it
            // on first load would dirty the CRDT for every collaborator.
            return;
        }
        st.had_content = true;

        let mut txn = self.doc.transact_mut_with(BINDING_ORIGIN);
        st.relative = Some(capture_selection(&mut txn, &self.fragment, state.selection()));

        let root = ContainerRef::Fragment(self.fragment.clone());
        if let Err(err) = reconcile_container(&mut txn, &root, state.doc(), &mut st.mapping) {
            error!(%err, "reconcile failed, CRDT left untouched");
            return;
        }
        Self::apply_removals(&mut txn, &mut st);
        st.mapping.invalidate_deleted(txn.delete_set());
        if let Some(user_data) = &st.user_data {
            user_data.record_delete_set(&mut txn);
        }
        st.relative = Some(capture_selection(&mut txn, &self.fragment, state.selection()));
    }

    // ==================== CRDT → Editor ====================

    fn on_crdt_events(&self, txn: &TransactionMut, events: &Events) {
        let Some(_guard) = self.gate.try_enter() else {
            return;
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return;
        }
        if let Some(active) = st.snapshot.clone() {
            // a historical view is on screen; refresh it once this
            // transaction has unwound
            let prev = st.prev_snapshot.clone();
            drop(st);
            self.enqueue(Command::RenderSnapshot {
                snapshot: active,
                prev,
            });
            return;
        }

        for event in events.iter() {
            if let Some(id) = event_branch_id(event) {
                st.mapping.remove(&id);
            }
        }
        // A change invalidates the whole ancestor chain, or cached parents
        // would keep serving stale subtrees.
        for branch in txn.changed_parent_types() {
            st.mapping.remove(&branch.id());
        }
        st.mapping.invalidate_deleted(txn.delete_set());

        let state = self.view.state();
        let schema = state.schema().clone();
        let (children, rejected, fatal) = {
            let mut m = Materializer::new(&schema, &mut st.mapping);
            let children = materialize_fragment(txn, &self.fragment, None, None, &mut m);
            (children, m.rejected, m.fatal)
        };
        if let Some(err) = fatal {
            error!(%err, "remote change cannot be translated");
            return;
        }
        if !rejected.is_empty() {
            st.pending_removals.extend(rejected);
            self.enqueue(Command::FlushHealing);
        }

        let doc_node = match schema.node(schema.top_name(), state.doc().attrs().clone(), children)
        {
            Ok(node) => node,
            Err(err) => {
                error!(%err, "schema rejected the document root");
                return;
            }
        };
        st.mapping
            .set_element(branch_id_of(&self.fragment), doc_node.clone());
        if doc_node.content_size() > 0 {
            st.had_content = true;
        }
        let selection = st
            .relative
            .as_ref()
            .and_then(|rel| restore_selection(txn, &self.fragment, rel));
        drop(st);

        let mut out = Transaction::new().replace_doc(doc_node).with_change_origin();
        if let Some(selection) = selection {
            out = out.with_selection(selection);
        }
        self.view.dispatch(out);
        self.enqueue(Command::CaptureSelection);
    }

    // ==================== Deferred command queue ====================

    fn enqueue(&self, command: Command) {
        self.queue.lock().unwrap().push_back(command);
    }

    fn drain(&self) -> Result<()> {
        if self.draining.swap(true, Ordering::AcqRel) {
            // a drain further up the stack will pick the new work up
            return Ok(());
        }
        let mut last = Ok(());
        loop {
            let command = self.queue.lock().unwrap().pop_front();
            let Some(command) = command else { break };
            if let Err(err) = self.run_command(command) {
                warn!(%err, "deferred command failed");
                last = Err(err);
            }
        }
        self.draining.store(false, Ordering::Release);
        last
    }

    fn run_command(&self, command: Command) -> Result<()> {
        match command {
            Command::RenderSnapshot { snapshot, prev } => self.render_snapshot_now(snapshot, prev),
            Command::UnrenderSnapshot => self.render_live(true, true),
            Command::ForceRerender => {
                let active = {
                    let st = self.state.lock().unwrap();
                    st.snapshot.clone().zip(st.prev_snapshot.clone())
                };
                match active {
                    Some((snapshot, prev)) => self.render_snapshot_now(snapshot, Some(prev)),
                    None => self.render_live(true, false),
                }
            }
            Command::FlushHealing => self.flush_healing(),
            Command::CaptureSelection => self.capture_now(),
        }
    }

    fn flush_healing(&self) -> Result<()> {
        let Some(_guard) = self.gate.try_enter() else {
            return Ok(());
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed || st.pending_removals.is_empty() {
            return Ok(());
        }
        let mut txn = self.doc.transact_mut_with(BINDING_ORIGIN);
        Self::apply_removals(&mut txn, &mut st);
        if let Some(user_data) = &st.user_data {
            user_data.record_delete_set(&mut txn);
        }
        Ok(())
    }

    fn capture_now(&self) -> Result<()> {
        let Some(_guard) = self.gate.try_enter() else {
            return Ok(());
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return Ok(());
        }
        let selection = self.view.state().selection();
        let mut txn = self.doc.transact_mut_with(BINDING_ORIGIN);
        st.relative = Some(capture_selection(&mut txn, &self.fragment, selection));
        Ok(())
    }

    fn apply_removals(txn: &mut TransactionMut, st: &mut BindingState) {
        for removal in std::mem::take(&mut st.pending_removals) {
            if let Some(index) = removal.parent.index_of(&*txn, &removal.child) {
                warn!("deleting schema-rejected node from the document");
                removal.parent.remove_range(txn, index, 1);
                st.mapping.remove(&removal.child);
            }
        }
    }

    // ==================== Rendering ====================

    /// Rebuild the editor document from the live CRDT state.
    fn render_live(&self, clear_mapping: bool, leave_snapshot: bool) -> Result<()> {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("live render dropped: translation in progress");
            return Ok(());
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return Err(BridgeError::Destroyed);
        }
        if clear_mapping {
            st.mapping.clear();
        }
        st.snapshot = None;
        st.prev_snapshot = None;

        let state = self.view.state();
        let schema = state.schema().clone();
        let mut txn = self.doc.transact_mut_with(BINDING_ORIGIN);
        let (children, rejected, fatal) = {
            let mut m = Materializer::new(&schema, &mut st.mapping);
            let children = materialize_fragment(&txn, &self.fragment, None, None, &mut m);
            (children, m.rejected, m.fatal)
        };
        if let Some(err) = fatal {
            return Err(err);
        }
        st.pending_removals.extend(rejected);
        Self::apply_removals(&mut txn, &mut st);
        if let Some(user_data) = &st.user_data {
            user_data.record_delete_set(&mut txn);
        }

        let doc_node = schema.node(schema.top_name(), state.doc().attrs().clone(), children)?;
        st.mapping
            .set_element(branch_id_of(&self.fragment), doc_node.clone());
        if doc_node.content_size() > 0 {
            st.had_content = true;
        }
        let selection = st
            .relative
            .as_ref()
            .and_then(|rel| restore_selection(&txn, &self.fragment, rel));
        st.relative = Some(capture_selection(
            &mut txn,
            &self.fragment,
            selection.unwrap_or(state.selection()),
        ));
        drop(txn);
        drop(st);

        let mut out = Transaction::new().replace_doc(doc_node).with_change_origin();
        if leave_snapshot {
            out = out.with_snapshot_meta(SnapshotMeta::default());
        }
        if let Some(selection) = selection {
            out = out.with_selection(selection);
        }
        self.view.dispatch(out);
        Ok(())
    }

    /// Rebuild the editor document as a historical view between two
    /// snapshots, with change annotations.
    fn render_snapshot_now(&self, snapshot: Snapshot, prev: Option<Snapshot>) -> Result<()> {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("snapshot render dropped: translation in progress");
            return Ok(());
        };
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return Err(BridgeError::Destroyed);
        }
        st.mapping.clear();
        let prev = prev.unwrap_or_else(empty_snapshot);
        st.snapshot = Some(snapshot.clone());
        st.prev_snapshot = Some(prev.clone());
        let user_data = st.user_data.clone();
        let allocator = RefCell::new(st.colors.take().expect("color allocator present"));

        let result = (|| {
            let (restored, restored_fragment) =
                restore_historical(&self.doc, &self.fragment, &snapshot, &prev)?;
            let resolve = change_resolver(&self.doc, user_data.as_ref(), &allocator);
            let deltas =
                collect_historical_deltas(&restored, &restored_fragment, &snapshot, &prev, &resolve);

            let state = self.view.state();
            let schema = state.schema().clone();
            let rtxn = restored.transact();
            let (children, rejected, fatal) = {
                let mut m = Materializer::new(&schema, &mut st.mapping);
                m.resolve_change = Some(&resolve);
                m.historical = Some(&deltas);
                let children = materialize_fragment(
                    &rtxn,
                    &restored_fragment,
                    Some(&snapshot),
                    Some(&prev),
                    &mut m,
                );
                (children, m.rejected, m.fatal)
            };
            if let Some(err) = fatal {
                return Err(err);
            }
            if !rejected.is_empty() {
                // the historical tree is a throwaway copy; nothing to heal
                warn!(
                    count = rejected.len(),
                    "schema-rejected nodes skipped in historical view"
                );
            }
            schema.node(schema.top_name(), state.doc().attrs().clone(), children)
        })();

        st.colors = Some(allocator.into_inner());
        let doc_node = match result {
            Ok(node) => node,
            Err(err) => {
                st.snapshot = None;
                st.prev_snapshot = None;
                return Err(err);
            }
        };
        drop(st);

        self.view.dispatch(
            Transaction::new()
                .replace_doc(doc_node)
                .with_change_origin()
                .with_snapshot_meta(SnapshotMeta {
                    snapshot: Some(snapshot),
                    prev_snapshot: Some(prev),
                }),
        );
        Ok(())
    }
}

fn event_branch_id(event: &Event) -> Option<BranchID> {
    match event {
        Event::XmlFragment(e) => Some(xml_branch_id(e.target())),
        Event::XmlText(e) => Some(branch_id_of(e.target())),
        Event::Text(e) => Some(branch_id_of(e.target())),
        _ => None,
    }
}
