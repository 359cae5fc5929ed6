use thiserror::Error;

/// Unified error type for ybridge operations
///
/// Schema rejections are ordinary values here rather than panics because a
/// remote peer can always produce a combination of nodes this replica's
/// schema forbids; the materializer catches them and self-heals (§ self-healing
/// notes in `binding/materialize.rs`).
#[derive(Debug, Error)]
pub enum BridgeError {
    // Schema construction errors
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("unknown mark type '{0}'")]
    UnknownMarkType(String),

    #[error("missing required attribute '{attr}' on '{node}'")]
    MissingAttribute { node: String, attr: String },

    #[error("node '{0}' cannot contain inline text")]
    TextNotAllowed(String),

    // Reconciler errors
    #[error("node name mismatch: CRDT element '{crdt}' vs editor node '{editor}'")]
    NodeNameMismatch { crdt: String, editor: String },

    #[error("a nested fragment is not a valid document child")]
    UnsupportedNodeKind,

    // CRDT library failures
    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    // Lifecycle
    #[error("binding has been destroyed")]
    Destroyed,
}

/// Result type alias for ybridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
