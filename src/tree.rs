//! Arena-based XML element tree
//!
//! The tree owns all nodes in a flat arena addressed by [`NodeId`] handles,
//! so callers hold copyable indices instead of reference-counted pointer
//! graphs. Node content is a closed variant: an element (qualified name,
//! resolved namespace, ordered attributes) or a text run.

use crate::error::{Diagnostic, Error, Result, Severity};
use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// Handle to a node in an [`XmlTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Element payload: qualified name, resolved namespace URI and attributes
#[derive(Debug, Clone)]
pub struct ElementData {
    /// Qualified name as written in the document (`prefix:local` or `local`)
    pub name: String,
    /// Namespace URI the element resolved to, if any
    pub namespace: Option<String>,
    /// Attributes in document/insertion order, xmlns declarations included
    pub attributes: IndexMap<String, String>,
}

/// Node content
#[derive(Debug, Clone)]
pub enum NodeData {
    /// An element node
    Element(ElementData),
    /// A text run (CDATA is folded in)
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Mutable XML element/text tree
#[derive(Debug, Clone, Default)]
pub struct XmlTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl XmlTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Create an element node without a namespace
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: name.into(),
            namespace: None,
            attributes: IndexMap::new(),
        }))
    }

    /// Create an element node bound to a namespace URI
    pub fn create_element_ns(
        &mut self,
        namespace: impl Into<String>,
        qualified_name: impl Into<String>,
    ) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: qualified_name.into(),
            namespace: Some(namespace.into()),
            attributes: IndexMap::new(),
        }))
    }

    /// Create a text node
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Text(text.into()))
    }

    /// Append a child node to a parent
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Get the document (root) element
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Set the document (root) element
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Node content accessor
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    /// Element payload accessor, `None` for text nodes
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id.0].data {
            NodeData::Element(data) => Some(data),
            NodeData::Text(_) => None,
        }
    }

    /// True when the node is an element
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].data, NodeData::Element(_))
    }

    /// Qualified name of an element node
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    /// Local part of an element's qualified name
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id)
            .map(|name| name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name))
    }

    /// Namespace URI an element resolved to
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.element(id).and_then(|e| e.namespace.as_deref())
    }

    /// Text content of a text node
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Text(text) => Some(text.as_str()),
            NodeData::Element(_) => None,
        }
    }

    /// Set an attribute on an element; no-op on text nodes
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let NodeData::Element(data) = &mut self.nodes[id.0].data {
            data.attributes.insert(name.into(), value.into());
        }
    }

    /// Get an attribute value by name
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|e| e.attributes.get(name))
            .map(|s| s.as_str())
    }

    /// Attribute map of an element
    pub fn attributes(&self, id: NodeId) -> Option<&IndexMap<String, String>> {
        self.element(id).map(|e| &e.attributes)
    }

    /// Replace the text content of an element, keeping element children
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        let kept: Vec<NodeId> = self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|&child| self.is_element(child))
            .collect();
        self.nodes[id.0].children = kept;
        let text_node = self.create_text(text);
        self.append_child(id, text_node);
    }

    /// Parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Children of a node in document order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Element children of a node in document order
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| self.is_element(child))
            .collect()
    }

    /// All descendants of a node in document order, the node excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            result.push(node);
            for &child in self.children(node).iter().rev() {
                stack.push(child);
            }
        }
        result
    }

    /// Concatenated text of a node and all its descendants
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id.0].data {
            NodeData::Text(text) => text.clone(),
            NodeData::Element(_) => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match &self.nodes[child.0].data {
                NodeData::Text(text) => out.push_str(text),
                NodeData::Element(_) => self.collect_text(child, out),
            }
        }
    }

    /// Parse an XML string into a tree.
    ///
    /// Namespace declarations are tracked in scope so every element records
    /// its resolved namespace URI; xmlns attributes also stay in the
    /// attribute map for introspection. Whitespace-only text runs are
    /// dropped, other text is kept verbatim with entities resolved.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut tree = XmlTree::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];

        loop {
            let position = reader.buffer_position();
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let element =
                        build_element(&mut tree, start.name().as_ref(), start.attributes(), &mut scopes, xml, position)?;
                    attach(&mut tree, &stack, element, xml, position)?;
                    stack.push(element);
                }
                Ok(Event::Empty(start)) => {
                    let element =
                        build_element(&mut tree, start.name().as_ref(), start.attributes(), &mut scopes, xml, position)?;
                    attach(&mut tree, &stack, element, xml, position)?;
                    scopes.pop();
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                    scopes.pop();
                }
                Ok(Event::Text(text)) => {
                    let content = text
                        .unescape()
                        .map_err(|e| parse_error(format!("invalid entity in text: {}", e), xml, position))?;
                    if !content.trim().is_empty() {
                        if let Some(&parent) = stack.last() {
                            let node = tree.create_text(content.into_owned());
                            tree.append_child(parent, node);
                        }
                    }
                }
                Ok(Event::CData(data)) => {
                    let content = String::from_utf8_lossy(data.as_ref()).into_owned();
                    if let Some(&parent) = stack.last() {
                        let node = tree.create_text(content);
                        tree.append_child(parent, node);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {} // declaration, comments, processing instructions
                Err(e) => return Err(parse_error(e.to_string(), xml, reader.buffer_position())),
            }
        }

        Ok(tree)
    }
}

fn parse_error(message: String, src: &str, offset: usize) -> Error {
    let (line, column) = position_at(src, offset);
    Error::MalformedXml(vec![Diagnostic::new(message)
        .with_position(line, column)
        .with_severity(Severity::Fatal)])
}

fn position_at(src: &str, offset: usize) -> (usize, usize) {
    let bytes = &src.as_bytes()[..offset.min(src.len())];
    let line = bytes.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| bytes.len() - pos)
        .unwrap_or(bytes.len() + 1);
    (line, column)
}

fn build_element(
    tree: &mut XmlTree,
    raw_name: &[u8],
    attributes: quick_xml::events::attributes::Attributes,
    scopes: &mut Vec<HashMap<String, String>>,
    src: &str,
    offset: usize,
) -> Result<NodeId> {
    let name = String::from_utf8_lossy(raw_name).into_owned();

    let mut attrs: IndexMap<String, String> = IndexMap::new();
    let mut scope = scopes.last().cloned().unwrap_or_default();
    for attribute in attributes {
        let attribute =
            attribute.map_err(|e| parse_error(format!("invalid attribute: {}", e), src, offset))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| parse_error(format!("invalid attribute value: {}", e), src, offset))?
            .into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value.clone());
        }
        attrs.insert(key, value);
    }

    let namespace = match name.split_once(':') {
        Some((prefix, _)) => scope.get(prefix).cloned(),
        None => scope.get("").cloned(),
    };
    scopes.push(scope);

    let element = tree.push(NodeData::Element(ElementData {
        name,
        namespace,
        attributes: attrs,
    }));
    Ok(element)
}

fn attach(tree: &mut XmlTree, stack: &[NodeId], element: NodeId, src: &str, offset: usize) -> Result<()> {
    match stack.last() {
        Some(&parent) => {
            tree.append_child(parent, element);
            Ok(())
        }
        None if tree.root.is_none() => {
            tree.set_root(element);
            Ok(())
        }
        None => Err(parse_error(
            "document has multiple root elements".to_string(),
            src,
            offset,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tree_by_hand() {
        let mut tree = XmlTree::new();
        let root = tree.create_element("Invoice");
        tree.set_root(root);
        let item = tree.create_element("Item");
        tree.append_child(root, item);
        tree.set_text(item, "widget");
        tree.set_attribute(item, "id", "1");

        assert_eq!(tree.name(root), Some("Invoice"));
        assert_eq!(tree.children(root), &[item]);
        assert_eq!(tree.attribute(item, "id"), Some("1"));
        assert_eq!(tree.string_value(item), "widget");
    }

    #[test]
    fn test_set_text_replaces_previous_text() {
        let mut tree = XmlTree::new();
        let root = tree.create_element("a");
        tree.set_text(root, "first");
        tree.set_text(root, "second");
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.string_value(root), "second");
    }

    #[test]
    fn test_parse_simple() {
        let tree = XmlTree::parse("<root><child>text</child></root>").unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.name(root), Some("root"));
        let children = tree.child_elements(root);
        assert_eq!(children.len(), 1);
        assert_eq!(tree.string_value(children[0]), "text");
    }

    #[test]
    fn test_parse_attributes_in_order() {
        let tree = XmlTree::parse(r#"<a z="1" b="2" m="3"/>"#).unwrap();
        let root = tree.root().unwrap();
        let keys: Vec<&String> = tree.attributes(root).unwrap().keys().collect();
        assert_eq!(keys, ["z", "b", "m"]);
    }

    #[test]
    fn test_parse_resolves_namespaces() {
        let xml = r#"<d:doc xmlns:d="urn:doc"><d:part/><plain/></d:doc>"#;
        let tree = XmlTree::parse(xml).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.namespace(root), Some("urn:doc"));
        assert_eq!(tree.local_name(root), Some("doc"));

        let children = tree.child_elements(root);
        assert_eq!(tree.namespace(children[0]), Some("urn:doc"));
        assert_eq!(tree.namespace(children[1]), None);
    }

    #[test]
    fn test_parse_default_namespace_scoping() {
        let xml = r#"<doc xmlns="urn:a"><inner xmlns="urn:b"><x/></inner><y/></doc>"#;
        let tree = XmlTree::parse(xml).unwrap();
        let root = tree.root().unwrap();
        let children = tree.child_elements(root);
        let inner_x = tree.child_elements(children[0])[0];
        assert_eq!(tree.namespace(inner_x), Some("urn:b"));
        assert_eq!(tree.namespace(children[1]), Some("urn:a"));
    }

    #[test]
    fn test_parse_drops_whitespace_only_text() {
        let tree = XmlTree::parse("<a>\n  <b>x</b>\n</a>").unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn test_parse_resolves_entities() {
        let tree = XmlTree::parse("<a>x &amp; y</a>").unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.string_value(root), "x & y");
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = XmlTree::parse("<a>\n<b></c></a>").unwrap_err();
        match err {
            Error::MalformedXml(diagnostics) => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].line, Some(2));
                assert_eq!(diagnostics[0].severity, Severity::Fatal);
            }
            other => panic!("expected MalformedXml, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_multiple_roots() {
        assert!(XmlTree::parse("<a/><b/>").is_err());
    }

    #[test]
    fn test_descendants_document_order() {
        let tree = XmlTree::parse("<a><b><c/></b><d/></a>").unwrap();
        let root = tree.root().unwrap();
        let names: Vec<&str> = tree
            .descendants(root)
            .into_iter()
            .filter_map(|id| tree.name(id))
            .collect();
        assert_eq!(names, ["b", "c", "d"]);
    }

    #[test]
    fn test_string_value_concatenates_descendant_text() {
        let tree = XmlTree::parse("<a>x<b>y</b>z</a>").unwrap();
        assert_eq!(tree.string_value(tree.root().unwrap()), "xyz");
    }
}
