//! Shared helpers for unit tests: a small rich-text schema and document
//! builders.

use yrs::Any;

use crate::editor::{Attrs, MarkSpec, Node, NodeSpec, Schema};

/// A doc/paragraph/heading/blockquote schema with bold and italic marks,
/// plus the `ychange` attribute and mark used by snapshot rendering.
pub fn rich_schema() -> Schema {
    Schema::new(
        "doc",
        [
            ("doc", NodeSpec::blocks()),
            ("blockquote", NodeSpec::blocks()),
            ("paragraph", NodeSpec::inline().attr("ychange", Any::Null)),
            (
                "heading",
                NodeSpec::inline()
                    .attr("level", Any::BigInt(1))
                    .attr("ychange", Any::Null),
            ),
        ],
        [
            ("bold", MarkSpec::new()),
            ("italic", MarkSpec::new()),
            (
                "ychange",
                MarkSpec::new()
                    .attr("type", Any::Null)
                    .attr("user", Any::Null)
                    .attr("color", Any::Null),
            ),
        ],
    )
}

pub fn doc_node(schema: &Schema, children: Vec<Node>) -> Node {
    schema.node("doc", Attrs::new(), children).unwrap()
}

pub fn paragraph(schema: &Schema, text: &str) -> Node {
    let children = if text.is_empty() {
        Vec::new()
    } else {
        vec![schema.text(text, Vec::new()).unwrap()]
    };
    schema.node("paragraph", Attrs::new(), children).unwrap()
}

pub fn empty_paragraph(schema: &Schema) -> Node {
    paragraph(schema, "")
}

pub fn heading(schema: &Schema, level: i64, text: &str) -> Node {
    let mut attrs = Attrs::new();
    attrs.insert("level".into(), Any::BigInt(level));
    let children = if text.is_empty() {
        Vec::new()
    } else {
        vec![schema.text(text, Vec::new()).unwrap()]
    };
    schema.node("heading", attrs, children).unwrap()
}

/// A paragraph starting with a bold run, optionally followed by plain
/// text.
pub fn bold_paragraph(schema: &Schema, bold: &str, plain: &str) -> Node {
    let bold_mark = schema.mark("bold", Attrs::new()).unwrap();
    let mut children = vec![schema.text(bold, vec![bold_mark]).unwrap()];
    if !plain.is_empty() {
        children.push(schema.text(plain, Vec::new()).unwrap());
    }
    schema.node("paragraph", Attrs::new(), children).unwrap()
}

/// A bare text node outside any schema, for map plumbing tests.
pub fn text_leaf(text: &str) -> Node {
    Node::text_node("text".into(), text.to_string(), Vec::new())
}
