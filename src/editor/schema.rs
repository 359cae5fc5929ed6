//! Document schema: the set of node and mark types a document may contain.
//!
//! Construction through the schema is fallible on purpose. A remote peer can
//! concurrently produce combinations this replica has never heard of (an
//! element with an unknown name, a mark from a newer client); those surface
//! here as errors and the binding reacts by deleting the offending CRDT
//! subtree rather than crashing (self-healing).
//!
//! Unknown *attribute keys* are not errors — they are silently dropped, so
//! documents annotated by richer peers still materialize.

use std::collections::HashMap;
use std::sync::Arc;

use yrs::Any;

use super::node::{Attrs, Mark, Node};
use crate::error::{BridgeError, Result};

/// Type name used for inline text nodes.
pub const TEXT_NODE_NAME: &str = "text";

/// Content model of an element node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Children are element nodes (e.g. a document holding paragraphs).
    Blocks,
    /// Children are inline text nodes (e.g. a paragraph).
    Inline,
}

/// Specification of one attribute on a node or mark type.
#[derive(Debug, Clone)]
pub struct AttrSpec {
    /// Value used when the attribute is absent. `None` makes it required.
    pub default: Option<Any>,
}

/// Specification of an element node type.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    content: ContentKind,
    attrs: HashMap<Arc<str>, AttrSpec>,
}

impl NodeSpec {
    /// A node type whose children are block elements.
    pub fn blocks() -> Self {
        Self {
            content: ContentKind::Blocks,
            attrs: HashMap::new(),
        }
    }

    /// A node type whose children are inline text nodes.
    pub fn inline() -> Self {
        Self {
            content: ContentKind::Inline,
            attrs: HashMap::new(),
        }
    }

    /// Declare an optional attribute with a default value.
    pub fn attr(mut self, name: &str, default: Any) -> Self {
        self.attrs.insert(
            Arc::from(name),
            AttrSpec {
                default: Some(default),
            },
        );
        self
    }

    /// Declare a required attribute.
    pub fn required_attr(mut self, name: &str) -> Self {
        self.attrs.insert(Arc::from(name), AttrSpec { default: None });
        self
    }
}

/// Specification of a mark type.
#[derive(Debug, Clone, Default)]
pub struct MarkSpec {
    attrs: HashMap<Arc<str>, AttrSpec>,
}

impl MarkSpec {
    /// A mark type without attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional attribute with a default value.
    pub fn attr(mut self, name: &str, default: Any) -> Self {
        self.attrs.insert(
            Arc::from(name),
            AttrSpec {
                default: Some(default),
            },
        );
        self
    }

    /// Declare a required attribute.
    pub fn required_attr(mut self, name: &str) -> Self {
        self.attrs.insert(Arc::from(name), AttrSpec { default: None });
        self
    }
}

/// A document schema: node types, mark types and the top-level node name.
#[derive(Debug)]
pub struct Schema {
    top: Arc<str>,
    nodes: HashMap<Arc<str>, NodeSpec>,
    marks: HashMap<Arc<str>, MarkSpec>,
}

impl Schema {
    /// Build a schema from node and mark specifications.
    ///
    /// `top` must name one of the given node types; it is the type of the
    /// document root.
    pub fn new<N, M>(top: &str, nodes: N, marks: M) -> Self
    where
        N: IntoIterator<Item = (&'static str, NodeSpec)>,
        M: IntoIterator<Item = (&'static str, MarkSpec)>,
    {
        let nodes: HashMap<Arc<str>, NodeSpec> = nodes
            .into_iter()
            .map(|(name, spec)| (Arc::from(name), spec))
            .collect();
        debug_assert!(nodes.contains_key(top));
        Self {
            top: Arc::from(top),
            nodes,
            marks: marks
                .into_iter()
                .map(|(name, spec)| (Arc::from(name), spec))
                .collect(),
        }
    }

    /// Name of the top-level node type.
    pub fn top_name(&self) -> &str {
        &self.top
    }

    /// Construct an element node, validating name, attributes and content.
    pub fn node(&self, name: &str, attrs: Attrs, children: Vec<Node>) -> Result<Node> {
        let (key, spec) = self
            .nodes
            .get_key_value(name)
            .ok_or_else(|| BridgeError::UnknownNodeType(name.to_string()))?;

        for child in &children {
            if child.is_text() && spec.content != ContentKind::Inline {
                return Err(BridgeError::TextNotAllowed(name.to_string()));
            }
        }

        let attrs = resolve_attrs(&spec.attrs, attrs, name)?;
        Ok(Node::element(key.clone(), attrs, children))
    }

    /// Construct an inline text node carrying the given marks.
    pub fn text(&self, text: impl Into<String>, marks: Vec<Mark>) -> Result<Node> {
        for mark in &marks {
            if !self.marks.contains_key(mark.name()) {
                return Err(BridgeError::UnknownMarkType(mark.name().to_string()));
            }
        }
        Ok(Node::text_node(Arc::from(TEXT_NODE_NAME), text.into(), marks))
    }

    /// Construct a mark, validating its name and attributes.
    pub fn mark(&self, name: &str, attrs: Attrs) -> Result<Mark> {
        let (key, spec) = self
            .marks
            .get_key_value(name)
            .ok_or_else(|| BridgeError::UnknownMarkType(name.to_string()))?;
        let attrs = resolve_attrs(&spec.attrs, attrs, name)?;
        Ok(Mark::new(key.clone(), attrs))
    }

    /// Whether a mark type of this name exists.
    pub fn has_mark(&self, name: &str) -> bool {
        self.marks.contains_key(name)
    }
}

/// Resolve given attributes against a spec: fill defaults, drop unknown
/// keys and explicit nulls, error on missing required values.
fn resolve_attrs(
    specs: &HashMap<Arc<str>, AttrSpec>,
    mut given: Attrs,
    owner: &str,
) -> Result<Attrs> {
    let mut resolved = Attrs::with_capacity(specs.len());
    for (key, spec) in specs {
        match given.remove(key) {
            Some(value) if value != Any::Null => {
                resolved.insert(key.clone(), value);
            }
            _ => match &spec.default {
                Some(default) => {
                    if *default != Any::Null {
                        resolved.insert(key.clone(), default.clone());
                    }
                }
                None => {
                    return Err(BridgeError::MissingAttribute {
                        node: owner.to_string(),
                        attr: key.to_string(),
                    });
                }
            },
        }
    }
    Ok(resolved)
}
