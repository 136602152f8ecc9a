//! Streaming XML reader that builds a schema-validated [`Tree`].

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{Child, ChildDef, ChildType, NodeHooks, NodeId, NodeKind, Tree};
use crate::error::NodeError;

/// Parses `text` into a tree rooted at `root`, running `hooks` as each node
/// opens and closes.
///
/// # Errors
/// Returns the first structural or validation failure, with the line it was
/// detected on.
pub fn parse<K, H>(text: &str, root: K, hooks: &mut H) -> Result<Tree<K>, NodeError>
where
    K: NodeKind,
    H: NodeHooks<K>,
{
    let mut builder = TreeBuilder {
        tree: Tree::empty(),
        root,
        stack: Vec::new(),
        text_slot: None,
    };
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);
    let mut lines = LineCounter::new(text);

    loop {
        let position = usize::try_from(reader.buffer_position()).unwrap_or(text.len());
        let event = reader.read_event().map_err(|e| {
            let line = lines.line_at(usize::try_from(reader.buffer_position()).unwrap_or(text.len()));
            NodeError::at(format!("XML: {e}"), line)
        })?;
        let line = lines.line_at(position);
        let step = match event {
            Event::Start(start) => builder.start(&start, line, hooks),
            Event::Empty(start) => element_name(&start).and_then(|name| {
                builder.start(&start, line, hooks)?;
                builder.end(&name, hooks)
            }),
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                builder.end(&name, hooks)
            }
            Event::Text(raw) => {
                match raw.unescape() {
                    Ok(text) => builder.characters(&text),
                    Err(e) => Err(NodeError::new(format!("XML: {e}"))),
                }
            }
            Event::CData(raw) => {
                let text = String::from_utf8_lossy(&raw).into_owned();
                builder.characters(&text)
            }
            Event::Eof => break,
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => Ok(()),
        };
        step.map_err(|e| e.or_line(line))?;
    }

    if !builder.stack.is_empty() {
        return Err(NodeError::at(
            "XML: unexpected end of document",
            lines.line_at(text.len()),
        ));
    }
    if builder.tree.is_empty() {
        return Err(NodeError::at("XML: no element found", lines.line_at(text.len())));
    }
    Ok(builder.tree)
}

struct TreeBuilder<K: NodeKind> {
    tree: Tree<K>,
    root: K,
    /// Nodes whose end tag has not been seen yet, with their buffered text.
    stack: Vec<(NodeId, String)>,
    /// Text-valued child element currently open, with its buffered text.
    text_slot: Option<(ChildDef<K>, String)>,
}

impl<K: NodeKind> TreeBuilder<K> {
    fn start<H: NodeHooks<K>>(
        &mut self,
        start: &BytesStart<'_>,
        line: usize,
        hooks: &mut H,
    ) -> Result<(), NodeError> {
        let name = element_name(start)?;
        let attributes = attributes(start)?;

        let Some(current) = self.current() else {
            if !self.tree.is_empty() {
                return Err(NodeError::new(format!(
                    "XML: junk after document element `{name}'"
                )));
            }
            if name != self.root.name() {
                return Err(NodeError::new(format!("unknown root element: `{name}'")));
            }
            let id = self.tree.create(self.root, None, &attributes, line)?;
            self.stack.push((id, String::new()));
            return hooks.opened(&mut self.tree, id);
        };

        if let Some((slot, _)) = &self.text_slot {
            return Err(NodeError::new(format!(
                "element `{name}' cannot be nested within element `{}'",
                slot.name
            )));
        }
        let parent_kind = self.tree.node(current).kind();
        let slot = *parent_kind.descriptor().child(&name).ok_or_else(|| {
            NodeError::new(format!(
                "element `{name}' cannot be nested within element `{}'",
                parent_kind.name()
            ))
        })?;

        match slot.ty {
            ChildType::Node(kind) => {
                let id = self.tree.create(kind, Some(current), &attributes, line)?;
                self.tree.attach(current, &slot, Child::Node(id))?;
                self.stack.push((id, String::new()));
                hooks.opened(&mut self.tree, id)
            }
            ChildType::Text(_) => {
                if !attributes.is_empty() {
                    return Err(NodeError::new(format!(
                        "extra attribute `{}' for element `{name}'",
                        attributes[0].0
                    )));
                }
                self.text_slot = Some((slot, String::new()));
                Ok(())
            }
        }
    }

    fn end<H: NodeHooks<K>>(&mut self, name: &str, hooks: &mut H) -> Result<(), NodeError> {
        if let Some((slot, text)) = self.text_slot.take() {
            if slot.name != name {
                return Err(NodeError::new(format!(
                    "internal error: close text element: expected `{}', got `{name}'",
                    slot.name
                )));
            }
            let ChildType::Text(validator) = slot.ty else {
                unreachable!("text slot always holds a text child type");
            };
            let value = validator(&text).map_err(|reason| {
                NodeError::new(format!("bad value [{reason}] for element `{name}'"))
            })?;
            let current = self.current().ok_or_else(|| {
                NodeError::new(format!("internal error: `{name}' outside any element"))
            })?;
            return self.tree.attach(current, &slot, Child::Text(value));
        }

        let Some((id, text)) = self.stack.pop() else {
            return Err(NodeError::new(format!("XML: unexpected end tag `{name}'")));
        };
        let kind = self.tree.node(id).kind();
        if kind.name() != name {
            return Err(NodeError::new(format!(
                "internal error: close element for <{}> unexpected, got <{name}>",
                kind.name()
            )));
        }
        self.tree.finish(id, &text)?;
        hooks.closed(&mut self.tree, id)
    }

    fn current(&self) -> Option<NodeId> {
        self.stack.last().map(|(id, _)| *id)
    }

    fn characters(&mut self, text: &str) -> Result<(), NodeError> {
        if let Some((_, buffer)) = &mut self.text_slot {
            buffer.push_str(text);
        } else if let Some((_, buffer)) = self.stack.last_mut() {
            buffer.push_str(text);
        } else if !text.trim().is_empty() {
            return Err(NodeError::new("XML: text outside the document element"));
        }
        Ok(())
    }
}

fn element_name(start: &BytesStart<'_>) -> Result<String, NodeError> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_owned)
        .map_err(|e| NodeError::new(format!("XML: {e}")))
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, NodeError> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| NodeError::new(format!("XML: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value: Cow<'_, str> = attr
                .unescape_value()
                .map_err(|e| NodeError::new(format!("XML: {e}")))?;
            Ok((key, value.into_owned()))
        })
        .collect()
}

/// Maps byte offsets to 1-based line numbers. Offsets must not decrease
/// between calls for the incremental scan to stay cheap.
struct LineCounter<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        if offset < self.offset {
            self.offset = 0;
            self.line = 1;
        }
        self.line += self.text.as_bytes()[self.offset..offset]
            .iter()
            .filter(|b| **b == b'\n')
            .count();
        self.offset = offset;
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AttributeDef, Cardinality, Descriptor};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Doc {
        Book,
        Chapter,
    }

    fn strip(s: &str) -> Result<String, String> {
        Ok(s.trim().to_owned())
    }

    fn number(s: &str) -> Result<String, String> {
        s.trim()
            .parse::<u32>()
            .map(|n| n.to_string())
            .map_err(|e| e.to_string())
    }

    static BOOK: Descriptor<Doc> = Descriptor {
        name: "book",
        attributes: &[AttributeDef {
            name: "title",
            required: true,
            validator: strip,
        }],
        children: &[
            ChildDef {
                name: "isbn",
                cardinality: Cardinality::Required,
                ty: ChildType::Text(number),
            },
            ChildDef {
                name: "chapter",
                cardinality: Cardinality::Many,
                ty: ChildType::Node(Doc::Chapter),
            },
        ],
        content: None,
    };

    static CHAPTER: Descriptor<Doc> = Descriptor {
        name: "chapter",
        attributes: &[],
        children: &[ChildDef {
            name: "chapter",
            cardinality: Cardinality::Many,
            ty: ChildType::Node(Doc::Chapter),
        }],
        content: Some(strip),
    };

    impl NodeKind for Doc {
        fn descriptor(self) -> &'static Descriptor<Self> {
            match self {
                Doc::Book => &BOOK,
                Doc::Chapter => &CHAPTER,
            }
        }
    }

    fn parse_doc(text: &str) -> Result<Tree<Doc>, NodeError> {
        parse(text, Doc::Book, &mut ())
    }

    #[test]
    fn parses_nested_nodes_and_text_slots() {
        let tree = parse_doc(
            "<book title=' Rust '>\n  <isbn> 42 </isbn>\n  <chapter>one<chapter>inner</chapter></chapter>\n</book>",
        )
        .expect("document should parse");
        let root = tree.node(tree.root());
        assert_eq!(root.attribute("title"), Some("Rust"));
        assert_eq!(root.text("isbn"), Some("42"));
        let chapter = root.child_node("chapter").unwrap();
        assert_eq!(tree.node(chapter).content(), Some("one"));
        assert_eq!(tree.node(chapter).parent(), Some(tree.root()));
        let inner = tree.node(chapter).child_node("chapter").unwrap();
        assert_eq!(tree.node(inner).content(), Some("inner"));
        assert_eq!(tree.node(inner).line(), 3);
        assert_eq!(tree.ancestors(inner).count(), 3);
    }

    #[test]
    fn rejects_unknown_root() {
        let err = parse_doc("<novel/>").unwrap_err();
        assert_eq!(err.message, "unknown root element: `novel'");
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn rejects_unexpected_child_with_line() {
        let err = parse_doc("<book title='x'>\n<isbn>1</isbn>\n<index/>\n</book>").unwrap_err();
        assert_eq!(err.message, "element `index' cannot be nested within element `book'");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn rejects_duplicate_single_valued_child() {
        let err = parse_doc("<book title='x'><isbn>1</isbn><isbn>2</isbn></book>").unwrap_err();
        assert!(err.message.contains("may not appear more than once"));
    }

    #[test]
    fn rejects_missing_attribute_and_child() {
        let err = parse_doc("<book><isbn>1</isbn></book>").unwrap_err();
        assert_eq!(err.message, "missing attribute `title' for element `book'");
        let err = parse_doc("<book title='x'></book>").unwrap_err();
        assert_eq!(err.message, "missing element `isbn' for element `book'");
    }

    #[test]
    fn rejects_extra_attribute() {
        let err = parse_doc("<book title='x' year='1'><isbn>1</isbn></book>").unwrap_err();
        assert_eq!(err.message, "extra attribute `year' for element `book'");
    }

    #[test]
    fn rejects_bad_text_value_and_illegal_content() {
        let err = parse_doc("<book title='x'><isbn>abc</isbn></book>").unwrap_err();
        assert!(err.message.starts_with("bad value"));
        let err = parse_doc("<book title='x'>words<isbn>1</isbn></book>").unwrap_err();
        assert_eq!(err.message, "content illegal for element `book'");
    }

    #[test]
    fn rejects_element_inside_text_slot() {
        let err = parse_doc("<book title='x'><isbn><chapter/></isbn></book>").unwrap_err();
        assert_eq!(err.message, "element `chapter' cannot be nested within element `isbn'");
    }

    #[test]
    fn reports_malformed_xml() {
        let err = parse_doc("<book title='x'>\n<isbn>1</isbn>\n</bok>").unwrap_err();
        assert!(err.message.starts_with("XML: "), "{}", err.message);
        assert!(err.line.is_some());
        let err = parse_doc("   ").unwrap_err();
        assert!(err.message.starts_with("XML: "));
    }

    #[test]
    fn line_counter_is_incremental() {
        let mut lines = LineCounter::new("a\nb\nc");
        assert_eq!(lines.line_at(0), 1);
        assert_eq!(lines.line_at(2), 2);
        assert_eq!(lines.line_at(5), 3);
        assert_eq!(lines.line_at(1), 1);
    }
}
