#![doc = include_str!("../README.md")]

/// The editor-side collaborator contract: document tree, schema, state,
/// transactions and the shared view handle
pub mod editor;

/// The reconciler core: binding controller, identity map, materializers,
/// reconcilers, snapshot rendering, selection bridge
pub mod binding;

/// Error (common error types)
pub mod error;

#[cfg(test)]
pub mod test_support;

pub use binding::{
    BindingConfig, ColorPair, FragmentBinding, MappedNode, PermanentUserData, TypeMapping,
    BINDING_ORIGIN, YCHANGE_KEY,
};
pub use editor::{
    Attrs, EditorState, EditorView, Mark, MarkSpec, Node, NodeSpec, Schema, SnapshotMeta,
    TextSelection, Transaction,
};
pub use error::{BridgeError, Result};
