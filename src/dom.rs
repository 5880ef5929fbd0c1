//! A small owned XML tree.
//!
//! Templates are read into this tree before directive parsing, and block
//! static structure is assembled in it before being serialised into the
//! generated code.

use std::fmt::Write as _;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::MarkupError;

/// Tag of the element every template source is wrapped in.
const ROOT_TAG: &str = "t";
const ROOT_PREFIX_LEN: usize = "<t>".len();

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

impl Node {
    pub const fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(el) => Some(el),
            Self::Text(_) | Self::Comment(_) => None,
        }
    }

    pub fn write_xml(&self, out: &mut String) {
        match self {
            Self::Element(el) => el.write_xml(out),
            Self::Text(text) => escape_into(out, text, false),
            Self::Comment(comment) => {
                let _ = write!(out, "<!--{comment}-->");
            }
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new<T: Into<String>>(tag: T) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes an attribute, returning its value.
    pub fn take_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(idx).1)
    }

    /// Sets an attribute, keeping its position when it already exists.
    pub fn set_attr<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Removes and returns all attributes, in document order.
    pub fn take_attrs(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.attrs)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) => el.collect_text(out),
                Node::Comment(_) => {}
            }
        }
    }

    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_xml(&mut out);
        }
        out
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    pub fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_into(out, value, true);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }

    /// Appends `node` to the descendant element reached by following `path`
    /// (child indexes from `self`). Returns false if the path is dangling.
    pub(crate) fn append_at(&mut self, path: &[usize], node: Node) -> bool {
        let mut current = self;
        for idx in path {
            match current.children.get_mut(*idx) {
                Some(Node::Element(el)) => current = el,
                _ => return false,
            }
        }
        current.children.push(node);
        true
    }

    /// Number of children of the element reached by following `path`.
    pub(crate) fn child_count_at(&self, path: &[usize]) -> usize {
        let mut current = self;
        for idx in path {
            match current.children.get(*idx) {
                Some(Node::Element(el)) => current = el,
                _ => return 0,
            }
        }
        current.children.len()
    }
}

fn escape_into(out: &mut String, text: &str, in_attribute: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn to_offset<P: TryInto<usize>>(pos: P) -> usize {
    pos.try_into().unwrap_or(usize::MAX)
}

struct TreeBuilder<'s> {
    source: &'s str,
    stack: Vec<Element>,
    root: Option<Element>,
}

impl<'s> TreeBuilder<'s> {
    const fn new(source: &'s str) -> Self {
        Self {
            source,
            stack: Vec::new(),
            root: None,
        }
    }

    fn error_at<M: Into<String>>(&self, wrapped_pos: usize, message: M) -> MarkupError {
        let pos = wrapped_pos.saturating_sub(ROOT_PREFIX_LEN);
        MarkupError::at_offset(self.source, pos, message)
    }

    fn element(&self, start: &BytesStart<'_>, pos: usize) -> Result<Element, MarkupError> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.error_at(pos, e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| self.error_at(pos, e.to_string()))?;
            element.attrs.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(element)
    }

    fn append(&mut self, node: Node, pos: usize) -> Result<(), MarkupError> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(node);
                Ok(())
            }
            None => match node {
                Node::Text(ref text) if text.trim().is_empty() => Ok(()),
                Node::Comment(_) => Ok(()),
                Node::Text(_) | Node::Element(_) => {
                    Err(self.error_at(pos, "Extra content at the end of the document"))
                }
            },
        }
    }

    fn close(&mut self, pos: usize) -> Result<(), MarkupError> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| self.error_at(pos, "Unexpected closing tag"))?;
        if self.stack.is_empty() {
            if self.root.is_some() {
                return Err(self.error_at(pos, "Extra content at the end of the document"));
            }
            self.root = Some(element);
            Ok(())
        } else {
            self.append(Node::Element(element), pos)
        }
    }
}

/// Reads a template source into a tree rooted at a synthetic `<t>` element.
///
/// # Errors
/// Returns a `MarkupError` when the source is not well-formed XML.
pub fn parse_markup(source: &str) -> Result<Element, MarkupError> {
    let wrapped = format!("<{ROOT_TAG}>{source}</{ROOT_TAG}>");
    let mut reader = Reader::from_str(&wrapped);
    reader.config_mut().trim_text(false);
    let mut builder = TreeBuilder::new(source);

    loop {
        let pos = to_offset(reader.buffer_position());
        let event = reader
            .read_event()
            .map_err(|e| builder.error_at(to_offset(reader.error_position()), e.to_string()))?;
        match event {
            Event::Start(start) => {
                let element = builder.element(&start, pos)?;
                if builder.root.is_some() {
                    return Err(builder.error_at(pos, "Extra content at the end of the document"));
                }
                builder.stack.push(element);
            }
            Event::Empty(start) => {
                let element = builder.element(&start, pos)?;
                builder.append(Node::Element(element), pos)?;
            }
            Event::End(_) => builder.close(pos)?,
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| builder.error_at(pos, e.to_string()))?;
                builder.append(Node::Text(text.into_owned()), pos)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                builder.append(Node::Text(text), pos)?;
            }
            Event::Comment(comment) => {
                let text = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                builder.append(Node::Comment(text), pos)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if let Some(open) = builder.stack.last() {
        let message = format!("Unclosed element <{}>", open.tag);
        return Err(MarkupError::at_offset(source, source.len(), message));
    }
    builder
        .root
        .ok_or_else(|| MarkupError::at_offset(source, 0, "Empty document"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_wraps_in_root() {
        let root = parse_markup("<div class=\"a\">hello</div>").unwrap();
        assert_eq!(root.tag, "t");
        assert_eq!(root.children.len(), 1);
        let div = root.children[0].as_element().unwrap();
        assert_eq!(div.tag, "div");
        assert_eq!(div.attr("class"), Some("a"));
        assert_eq!(div.text_content(), "hello");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_keeps_attribute_order_and_entities() {
        let root = parse_markup(r#"<input b="1" a="x &amp; y" t-on-click="f"/>"#).unwrap();
        let input = root.children[0].as_element().unwrap();
        let names: Vec<&str> = input.attrs().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a", "t-on-click"]);
        assert_eq!(input.attr("a"), Some("x & y"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_comments_and_cdata() {
        let root = parse_markup("<!-- note --><p><![CDATA[a < b]]></p>").unwrap();
        assert_eq!(root.children[0], Node::Comment(" note ".to_string()));
        let p = root.children[1].as_element().unwrap();
        assert_eq!(p.children[0], Node::Text("a < b".to_string()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_rejects_mismatched_tags() {
        let err = parse_markup("<div>\n<span></div>").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_markup("<div>").is_err());
        assert!(parse_markup("<div a=\"1\" a=\"2\"/>").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_serialize() {
        let root = parse_markup(r#"<div title="a &quot;b&quot;"><br/>x &amp; y<!--c--></div>"#)
            .unwrap();
        assert_eq!(
            root.children[0].to_xml(),
            r#"<div title="a &quot;b&quot;"><br/>x &amp; y<!--c--></div>"#
        );
        assert_eq!(
            root.inner_xml(),
            r#"<div title="a &quot;b&quot;"><br/>x &amp; y<!--c--></div>"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_append_at_path() {
        let mut root = Element::new("div");
        root.children.push(Node::Element(Element::new("span")));
        assert!(root.append_at(&[0], Node::Text("x".to_string())));
        assert!(!root.append_at(&[3], Node::Text("y".to_string())));
        assert_eq!(root.to_xml(), "<div><span>x</span></div>");
        assert_eq!(root.child_count_at(&[0]), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_take_and_set_attr() {
        let mut el = Element::new("div");
        el.set_attr("a", "1");
        el.set_attr("b", "2");
        el.set_attr("a", "3");
        assert_eq!(el.to_xml(), r#"<div a="3" b="2"/>"#);
        assert_eq!(el.take_attr("a"), Some("3".to_string()));
        assert!(!el.has_attr("a"));
        assert_eq!(el.take_attr("a"), None);
    }
}
