//! Generic schema-validated document trees.
//!
//! A document is described by a closed set of node kinds (an enum implementing
//! [`NodeKind`]), each carrying a static [`Descriptor`] that lists the
//! attributes, child slots and textual content the kind accepts. The reader in
//! [`reader`] turns an XML document into a [`Tree`] that conforms to those
//! descriptors, and [`writer`] renders a tree back into the same format.
//!
//! Nodes live in a single arena owned by the tree. Parent links are plain
//! [`NodeId`] indices and the root is always the first node, so there are no
//! reference cycles between a node and its children.

pub mod reader;
pub mod writer;

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::error::NodeError;

pub use reader::parse;
pub use writer::write_xml;

/// Converts raw text into its validated form, or explains why it is illegal.
pub type Validator = fn(&str) -> Result<String, String>;

/// How many times a child slot may be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one occurrence.
    Required,
    /// Zero or one occurrence.
    Optional,
    /// Zero or more occurrences.
    Many,
}

impl Cardinality {
    #[must_use]
    pub fn is_single(self) -> bool {
        !matches!(self, Cardinality::Many)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeDef {
    pub name: &'static str,
    pub required: bool,
    pub validator: Validator,
}

/// What a child slot holds: a nested node of some kind, or plain text.
#[derive(Debug, Clone, Copy)]
pub enum ChildType<K: 'static> {
    Node(K),
    Text(Validator),
}

#[derive(Debug, Clone, Copy)]
pub struct ChildDef<K: 'static> {
    pub name: &'static str,
    pub cardinality: Cardinality,
    pub ty: ChildType<K>,
}

/// Static schema of one node kind.
#[derive(Debug)]
pub struct Descriptor<K: 'static> {
    /// Element name in the document.
    pub name: &'static str,
    pub attributes: &'static [AttributeDef],
    /// Child slots, in the order they are serialized.
    pub children: &'static [ChildDef<K>],
    /// Validator for the element's own text content. `None` forbids content.
    pub content: Option<Validator>,
}

impl<K: Copy> Descriptor<K> {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ChildDef<K>> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// A closed set of node kinds forming one document schema.
pub trait NodeKind: Copy + Eq + fmt::Debug + 'static {
    fn descriptor(self) -> &'static Descriptor<Self>;

    fn name(self) -> &'static str {
        self.descriptor().name
    }
}

/// Validation callbacks run while a tree is being built.
///
/// `opened` runs once a node's attributes are validated, before any of its
/// children are read. `closed` runs after mandatory children and content have
/// been checked; it is the per-kind consistency check and sees the complete
/// subtree.
pub trait NodeHooks<K: NodeKind> {
    fn opened(&mut self, _tree: &mut Tree<K>, _id: NodeId) -> Result<(), NodeError> {
        Ok(())
    }

    fn closed(&mut self, _tree: &mut Tree<K>, _id: NodeId) -> Result<(), NodeError> {
        Ok(())
    }
}

impl<K: NodeKind> NodeHooks<K> for () {}

/// Index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One filled child slot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Node(NodeId),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node<K: NodeKind> {
    kind: K,
    line: usize,
    parent: Option<NodeId>,
    attributes: HashMap<&'static str, String>,
    children: HashMap<&'static str, Vec<Child>>,
    content: Option<String>,
}

impl<K: NodeKind> Node<K> {
    fn new(kind: K, line: usize, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            line,
            parent,
            attributes: HashMap::new(),
            children: HashMap::new(),
            content: kind.descriptor().content.map(|_| String::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> K {
        self.kind
    }

    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Validated content, present only for kinds that declare content.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    #[must_use]
    pub fn children(&self, slot: &str) -> &[Child] {
        self.children.get(slot).map_or(&[], Vec::as_slice)
    }

    pub fn child_nodes<'a>(&'a self, slot: &str) -> impl Iterator<Item = NodeId> + use<'a, K> {
        self.children(slot).iter().filter_map(|c| match c {
            Child::Node(id) => Some(*id),
            Child::Text(_) => None,
        })
    }

    #[must_use]
    pub fn child_node(&self, slot: &str) -> Option<NodeId> {
        self.child_nodes(slot).next()
    }

    pub fn texts<'a>(&'a self, slot: &str) -> impl Iterator<Item = &'a str> + use<'a, K> {
        self.children(slot).iter().filter_map(|c| match c {
            Child::Text(text) => Some(text.as_str()),
            Child::Node(_) => None,
        })
    }

    #[must_use]
    pub fn text(&self, slot: &str) -> Option<&str> {
        self.texts(slot).next()
    }

    fn slot_len(&self, slot: &str) -> usize {
        self.children(slot).len()
    }
}

/// Arena holding every node of one document.
#[derive(Debug, Clone)]
pub struct Tree<K: NodeKind> {
    nodes: Vec<Node<K>>,
}

impl<K: NodeKind> Tree<K> {
    pub(crate) fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    /// The root node. Trees returned by [`parse`] always have one.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node<K> {
        &self.nodes[id.0]
    }

    /// Walks from `id` up to the root, starting with `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |current| self.node(*current).parent)
    }

    /// Creates a node with validated attributes. The node is not attached to
    /// any slot of its parent yet.
    pub(crate) fn create(
        &mut self,
        kind: K,
        parent: Option<NodeId>,
        attributes: &[(String, String)],
        line: usize,
    ) -> Result<NodeId, NodeError> {
        let descriptor = kind.descriptor();
        let mut node = Node::new(kind, line, parent);

        for def in descriptor.attributes {
            match attributes.iter().find(|(name, _)| name == def.name) {
                Some((_, raw)) => {
                    let value = (def.validator)(raw).map_err(|reason| {
                        NodeError::new(format!(
                            "bad attribute value {}=`{raw}' [{reason}] for element `{}'",
                            def.name, descriptor.name
                        ))
                    })?;
                    node.attributes.insert(def.name, value);
                }
                None if def.required => {
                    return Err(NodeError::new(format!(
                        "missing attribute `{}' for element `{}'",
                        def.name, descriptor.name
                    )));
                }
                None => {}
            }
        }
        if let Some((name, _)) = attributes
            .iter()
            .find(|(name, _)| descriptor.attribute(name).is_none())
        {
            return Err(NodeError::new(format!(
                "extra attribute `{name}' for element `{}'",
                descriptor.name
            )));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    /// Files `child` under `slot` of `parent`, enforcing single-valued slots.
    pub(crate) fn attach(
        &mut self,
        parent: NodeId,
        slot: &ChildDef<K>,
        child: Child,
    ) -> Result<(), NodeError> {
        let node = &mut self.nodes[parent.0];
        if slot.cardinality.is_single() && node.slot_len(slot.name) > 0 {
            return Err(NodeError::new(format!(
                "element `{}' may not appear more than once as a child of `{}'",
                slot.name,
                node.kind.name()
            )));
        }
        node.children.entry(slot.name).or_default().push(child);
        Ok(())
    }

    /// Checks required slots and validates accumulated content once a node's
    /// end tag has been seen.
    pub(crate) fn finish(&mut self, id: NodeId, text: &str) -> Result<(), NodeError> {
        let node = &mut self.nodes[id.0];
        let descriptor = node.kind.descriptor();
        for slot in descriptor.children {
            if slot.cardinality == Cardinality::Required && node.slot_len(slot.name) == 0 {
                return Err(NodeError::new(format!(
                    "missing element `{}' for element `{}'",
                    slot.name, descriptor.name
                )));
            }
        }
        let text = text.trim();
        match descriptor.content {
            Some(validator) => {
                let value = validator(text).map_err(|reason| {
                    NodeError::new(format!(
                        "content error {reason} for element `{}'",
                        descriptor.name
                    ))
                })?;
                node.content = Some(value);
            }
            None if !text.is_empty() => {
                return Err(NodeError::new(format!(
                    "content illegal for element `{}'",
                    descriptor.name
                )));
            }
            None => {}
        }
        Ok(())
    }

    /// Appends a fully formed node below `parent`, as if it had been read
    /// from the document. Used by schemas that synthesize implicit elements.
    pub fn insert(
        &mut self,
        parent: NodeId,
        kind: K,
        attributes: &[(String, String)],
    ) -> Result<NodeId, NodeError> {
        let parent_kind = self.node(parent).kind;
        let slot = *parent_kind
            .descriptor()
            .children
            .iter()
            .find(|c| matches!(c.ty, ChildType::Node(k) if k == kind))
            .ok_or_else(|| {
                NodeError::new(format!(
                    "element `{}' cannot be nested within element `{}'",
                    kind.name(),
                    parent_kind.name()
                ))
            })?;
        let line = self.node(parent).line;
        let id = self.create(kind, Some(parent), attributes, line)?;
        self.attach(parent, &slot, Child::Node(id))?;
        self.finish(id, "")?;
        Ok(id)
    }

    /// Readable indented rendering of the tree, for debug logs.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if !self.is_empty() {
            self.dump_node(self.root(), 1, &mut out);
        }
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let descriptor = node.kind.descriptor();
        let pad = "  ".repeat(depth);
        let _ = writeln!(out, "{}<<{}>>", "  ".repeat(depth - 1), descriptor.name);
        for def in descriptor.attributes {
            if let Some(value) = node.attribute(def.name) {
                let _ = writeln!(out, "{pad}{} = `{value}'", def.name);
            }
        }
        if let Some(content) = node.content() {
            let _ = writeln!(out, "{pad}content = `{content}'");
        }
        for slot in descriptor.children {
            for child in node.children(slot.name) {
                match child {
                    Child::Node(child_id) => self.dump_node(*child_id, depth + 1, out),
                    Child::Text(text) => {
                        let _ = writeln!(out, "{pad}{} = `{text}'", slot.name);
                    }
                }
            }
        }
    }
}
