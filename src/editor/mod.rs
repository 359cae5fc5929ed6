//! The editor-side collaborator contract.
//!
//! This module is deliberately framework-free: a persistent document tree
//! ([`Node`]), a fallible [`Schema`], immutable [`EditorState`] +
//! [`Transaction`] pairs and a shared [`EditorView`] handle. The sync
//! binding in [`crate::binding`] consumes exactly this surface and nothing
//! more, so a richer editor can replace it by implementing the same shapes.
//!
//! # Positions
//!
//! Document positions follow the usual rich-text convention: entering or
//! leaving an element costs one position, text contributes its UTF-8 byte
//! length. This matches the CRDT library's default offset kind, so the two
//! sides of the binding agree on indices without translation.

mod node;
mod schema;
mod state;
mod view;

pub use node::{Attrs, Mark, Node};
pub use schema::{AttrSpec, ContentKind, MarkSpec, NodeSpec, Schema, TEXT_NODE_NAME};
pub use state::{EditorState, SnapshotMeta, TextSelection, Transaction};
pub use view::{EditorView, ListenerId, SyncState, UpdateListener};
