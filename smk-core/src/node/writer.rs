//! Renders a [`Tree`] back into the document format it was read from.

use std::fmt::Write as _;

use quick_xml::escape::escape;

use super::{Child, NodeId, NodeKind, Tree};

/// Serializes `tree` as indented XML.
///
/// Attributes are emitted in declared order, followed by the element content
/// and then every child slot in declared order. Parsing the result with the
/// same schema reproduces an equivalent tree.
#[must_use]
pub fn write_xml<K: NodeKind>(tree: &Tree<K>) -> String {
    let mut out = String::new();
    if !tree.is_empty() {
        write_node(tree, tree.root(), 1, &mut out);
    }
    out
}

fn write_node<K: NodeKind>(tree: &Tree<K>, id: NodeId, depth: usize, out: &mut String) {
    let node = tree.node(id);
    let descriptor = node.kind().descriptor();
    let indent = "  ".repeat(depth - 1);

    let _ = write!(out, "{indent}<{}", descriptor.name);
    for def in descriptor.attributes {
        if let Some(value) = node.attribute(def.name) {
            let _ = write!(out, " {}='{}'", def.name, escape(value));
        }
    }

    if descriptor.children.is_empty() && descriptor.content.is_none() {
        out.push_str("/>\n");
        return;
    }
    out.push('>');

    if let Some(content) = node.content() {
        out.push_str(&escape(content));
    }

    if descriptor.children.is_empty() {
        let _ = writeln!(out, "</{}>", descriptor.name);
        return;
    }

    out.push('\n');
    for slot in descriptor.children {
        for child in node.children(slot.name) {
            match child {
                Child::Node(child_id) => write_node(tree, *child_id, depth + 1, out),
                Child::Text(text) => {
                    let _ = writeln!(out, "{indent}  <{0}>{1}</{0}>", slot.name, escape(text));
                }
            }
        }
    }
    let _ = writeln!(out, "{indent}</{}>", descriptor.name);
}
