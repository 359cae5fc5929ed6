//! Immutable editor document tree.
//!
//! Nodes are persistent: every edit produces a new tree that shares all
//! unchanged subtrees with the previous one by reference. The reconciler
//! depends on this — [`Node::ptr_eq`] on an unchanged subtree is what lets
//! it pin a diff to the true boundaries of an edit without comparing
//! content.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use yrs::Any;

/// Attribute map shared by nodes and marks.
///
/// This is the same shape the CRDT stores (`yrs::types::Attrs`), so values
/// cross the binding without conversion.
pub type Attrs = HashMap<Arc<str>, Any>;

/// An inline formatting annotation attached to a text node.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    name: Arc<str>,
    attrs: Attrs,
}

impl Mark {
    pub(crate) fn new(name: Arc<str>, attrs: Attrs) -> Self {
        Self { name, attrs }
    }

    /// Type name of this mark (e.g. `"bold"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes of this mark.
    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }
}

/// A node in the editor document tree.
///
/// Cloning is cheap (a reference count); two clones of the same node
/// compare equal under [`Node::ptr_eq`].
#[derive(Clone)]
pub struct Node(Arc<NodeData>);

#[derive(Debug)]
struct NodeData {
    name: Arc<str>,
    attrs: Attrs,
    content: NodeContent,
}

#[derive(Debug)]
enum NodeContent {
    /// Ordered element children.
    Element(Vec<Node>),
    /// Inline text with marks.
    Text { text: String, marks: Vec<Mark> },
}

impl Node {
    pub(crate) fn element(name: Arc<str>, attrs: Attrs, children: Vec<Node>) -> Self {
        Self(Arc::new(NodeData {
            name,
            attrs,
            content: NodeContent::Element(children),
        }))
    }

    pub(crate) fn text_node(name: Arc<str>, text: String, marks: Vec<Mark>) -> Self {
        Self(Arc::new(NodeData {
            name,
            attrs: Attrs::new(),
            content: NodeContent::Text { text, marks },
        }))
    }

    /// Type name of this node.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.0.name.clone()
    }

    /// Attributes of this node. Always empty for text nodes.
    pub fn attrs(&self) -> &Attrs {
        &self.0.attrs
    }

    /// True if this is an inline text node.
    pub fn is_text(&self) -> bool {
        matches!(self.0.content, NodeContent::Text { .. })
    }

    /// Text content, if this is a text node.
    pub fn text(&self) -> Option<&str> {
        match &self.0.content {
            NodeContent::Text { text, .. } => Some(text),
            NodeContent::Element(_) => None,
        }
    }

    /// Marks on this text node. Empty for elements.
    pub fn marks(&self) -> &[Mark] {
        match &self.0.content {
            NodeContent::Text { marks, .. } => marks,
            NodeContent::Element(_) => &[],
        }
    }

    /// Element children. Empty for text nodes.
    pub fn children(&self) -> &[Node] {
        match &self.0.content {
            NodeContent::Element(children) => children,
            NodeContent::Text { .. } => &[],
        }
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    /// Identity equality: do both handles point at the same allocation?
    ///
    /// This is the editor-side identity the reconciler's anchors rely on;
    /// structural equality is a separate, weaker relation.
    pub fn ptr_eq(a: &Node, b: &Node) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Size of this node in document positions: text nodes count their
    /// UTF-8 byte length, elements cost one position to enter and one to
    /// leave plus their content.
    pub fn node_size(&self) -> usize {
        match &self.0.content {
            NodeContent::Text { text, .. } => text.len(),
            NodeContent::Element(_) => 2 + self.content_size(),
        }
    }

    /// Total size of this node's content (sum of child sizes).
    pub fn content_size(&self) -> usize {
        self.children().iter().map(Node::node_size).sum()
    }

}

/// Structural equality: same name, attributes and content, ignoring
/// identity. Used by tests; the reconciler uses its own predicates.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if self.0.name != other.0.name || self.0.attrs != other.0.attrs {
            return false;
        }
        match (&self.0.content, &other.0.content) {
            (NodeContent::Element(a), NodeContent::Element(b)) => a == b,
            (
                NodeContent::Text { text: ta, marks: ma },
                NodeContent::Text { text: tb, marks: mb },
            ) => ta == tb && ma == mb,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.content {
            NodeContent::Text { text, marks } => {
                write!(f, "{:?}", text)?;
                for mark in marks {
                    write!(f, "+{}", mark.name())?;
                }
                Ok(())
            }
            NodeContent::Element(children) => {
                write!(f, "<{}", self.0.name)?;
                if !self.0.attrs.is_empty() {
                    let mut keys: Vec<_> = self.0.attrs.keys().collect();
                    keys.sort();
                    for key in keys {
                        write!(f, " {}={:?}", key, self.0.attrs[key])?;
                    }
                }
                write!(f, ">")?;
                for child in children {
                    write!(f, "{:?}", child)?;
                }
                write!(f, "</{}>", self.0.name)
            }
        }
    }
}
