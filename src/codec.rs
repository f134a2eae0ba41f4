//! Structured value <-> XML tree codec
//!
//! Encodes nested [`serde_json::Value`] mappings into an element tree and
//! decodes a tree back into nested values, using the fiscal-document
//! conventions: `@attributes` holds the attribute map of the enclosing
//! element, `@value` its text content when attributes are present, and a
//! sequence under a key produces repeated sibling elements with that tag.
//!
//! Skip policy: `null`, `false` and empty sequences/mappings omit the
//! element entirely; the empty string and `true` produce an empty element.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::text::sanitize;
use crate::tree::{NodeData, NodeId, XmlTree};
use serde_json::{Map, Value};

/// Reserved key carrying the attribute map of the enclosing element
pub const ATTRIBUTES_KEY: &str = "@attributes";

/// Reserved key carrying the text content of an attributed element
pub const VALUE_KEY: &str = "@value";

/// Namespace tuple applied to elements created by the encoder
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct XmlNamespace {
    /// Namespace URI
    pub uri: String,
    /// Prefix, `None` for the default namespace
    pub prefix: Option<String>,
}

impl XmlNamespace {
    /// Namespace bound to a prefix
    pub fn prefixed(uri: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefix: Some(prefix.into()),
        }
    }

    /// Default (unprefixed) namespace
    pub fn unprefixed(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefix: None,
        }
    }

    fn qualify(&self, tag: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, tag),
            None => tag.to_string(),
        }
    }

    fn declaration_attribute(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        }
    }
}

/// True when a value is omitted from the output entirely
fn is_skippable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        // `true` produces an empty element
        _ => String::new(),
    }
}

/// Encode a nested mapping into a fresh [`Document`].
///
/// The first top-level key becomes the root element; created elements are
/// bound to `namespace` when one is supplied.
pub fn encode(data: &Map<String, Value>, namespace: Option<&XmlNamespace>) -> Result<Document> {
    let mut doc = Document::new();
    encode_into(&mut doc, None, data, namespace)?;
    Ok(doc)
}

/// Encode a nested mapping into an existing document under `parent`.
///
/// With `parent` unset the first encoded element becomes the document root;
/// `@attributes` entries are a no-op until a parent element exists.
pub fn encode_into(
    doc: &mut Document,
    parent: Option<NodeId>,
    data: &Map<String, Value>,
    namespace: Option<&XmlNamespace>,
) -> Result<()> {
    for (key, value) in data {
        match key.as_str() {
            ATTRIBUTES_KEY => {
                let Some(parent) = parent else { continue };
                if is_skippable(value) {
                    continue;
                }
                let attrs = value.as_object().ok_or_else(|| {
                    Error::InvalidStructure("@attributes must be a mapping of scalars".to_string())
                })?;
                for (name, attr_value) in attrs {
                    if attr_value.is_object() || attr_value.is_array() {
                        return Err(Error::InvalidStructure(format!(
                            "attribute '{}' must have a scalar value",
                            name
                        )));
                    }
                    if is_skippable(attr_value) {
                        continue;
                    }
                    doc.tree_mut()
                        .set_attribute(parent, name, scalar_text(attr_value));
                }
            }
            VALUE_KEY => {
                let Some(parent) = parent else { continue };
                if is_skippable(value) {
                    continue;
                }
                if value.is_object() || value.is_array() {
                    return Err(Error::InvalidStructure(
                        "@value must be a scalar".to_string(),
                    ));
                }
                let text = sanitize(&scalar_text(value));
                if !text.is_empty() {
                    doc.tree_mut().set_text(parent, text);
                }
            }
            _ => {
                if is_skippable(value) {
                    continue;
                }
                match value {
                    Value::Object(_) | Value::Array(_) => {
                        encode_children(doc, parent, key, value, namespace)?;
                    }
                    scalar => {
                        let element = create_element(doc, key, namespace);
                        let text = sanitize(&scalar_text(scalar));
                        if !text.is_empty() {
                            doc.tree_mut().set_text(element, text);
                        }
                        attach(doc, parent, element, namespace)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Build the sibling elements for key `key`.
///
/// An associative record counts as a one-element list; each scalar item
/// becomes an additional sibling, which is how repeated elements are
/// produced.
fn encode_children(
    doc: &mut Document,
    parent: Option<NodeId>,
    key: &str,
    value: &Value,
    namespace: Option<&XmlNamespace>,
) -> Result<()> {
    let items: Vec<&Value> = match value {
        Value::Array(list) => list.iter().collect(),
        record => vec![record],
    };

    for item in items {
        if is_skippable(item) {
            continue;
        }
        match item {
            Value::Object(record) => {
                let element = create_element(doc, key, namespace);
                attach(doc, parent, element, namespace)?;
                encode_into(doc, Some(element), record, namespace)?;
            }
            Value::Array(_) => {
                return Err(Error::InvalidStructure(format!(
                    "'{}' nests a sequence directly inside a sequence",
                    key
                )));
            }
            scalar => {
                let element = create_element(doc, key, namespace);
                let text = sanitize(&scalar_text(scalar));
                if !text.is_empty() {
                    doc.tree_mut().set_text(element, text);
                }
                attach(doc, parent, element, namespace)?;
            }
        }
    }
    Ok(())
}

fn create_element(doc: &mut Document, tag: &str, namespace: Option<&XmlNamespace>) -> NodeId {
    match namespace {
        Some(ns) => {
            let qualified = ns.qualify(tag);
            doc.tree_mut().create_element_ns(ns.uri.clone(), qualified)
        }
        None => doc.tree_mut().create_element(tag),
    }
}

fn attach(
    doc: &mut Document,
    parent: Option<NodeId>,
    element: NodeId,
    namespace: Option<&XmlNamespace>,
) -> Result<()> {
    match parent {
        Some(parent) => {
            doc.tree_mut().append_child(parent, element);
            Ok(())
        }
        None if doc.tree().root().is_none() => {
            doc.tree_mut().set_root(element);
            // declare the namespace where the scope starts
            if let Some(ns) = namespace {
                doc.tree_mut()
                    .set_attribute(element, ns.declaration_attribute(), ns.uri.clone());
            }
            Ok(())
        }
        None => Err(Error::InvalidStructure(
            "data encodes more than one root element".to_string(),
        )),
    }
}

/// Decode a whole tree into a nested mapping keyed by the root tag.
///
/// An empty tree yields an empty mapping. Decoding never fails for a
/// structurally valid tree.
pub fn decode(tree: &XmlTree) -> Value {
    match tree.root() {
        Some(root) => decode_node(tree, root, false),
        None => Value::Object(Map::new()),
    }
}

/// Decode a single element (and its subtree) into a nested mapping.
///
/// With `twins_as_array` set, repeated sibling content is merged into the
/// accumulator the way twin aggregation expects; callers starting from a
/// regular element pass `false`.
pub fn decode_node(tree: &XmlTree, node: NodeId, twins_as_array: bool) -> Value {
    let Some(tag) = tree.name(node).map(str::to_string) else {
        return Value::Object(Map::new());
    };
    let mut acc = Map::new();
    acc.insert(tag, Value::Null);
    decode_into(tree, node, &mut acc, twins_as_array);
    Value::Object(acc)
}

fn decode_into(tree: &XmlTree, node: NodeId, acc: &mut Map<String, Value>, twins_as_array: bool) {
    let Some(tag) = tree.name(node).map(str::to_string) else {
        return;
    };

    let has_attributes = tree
        .attributes(node)
        .map(|attrs| !attrs.is_empty())
        .unwrap_or(false);
    if has_attributes {
        let mut attr_map = Map::new();
        if let Some(attrs) = tree.attributes(node) {
            for (name, value) in attrs {
                attr_map.insert(name.clone(), Value::String(value.clone()));
            }
        }
        slot_object(acc, &tag).insert(ATTRIBUTES_KEY.to_string(), Value::Object(attr_map));
    }

    let children = tree.children(node).to_vec();
    for &child in &children {
        match tree.node(child) {
            NodeData::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !has_attributes && children.len() == 1 {
                    acc.insert(tag.clone(), Value::String(trimmed.to_string()));
                } else {
                    append_text_value(slot_object(acc, &tag), trimmed);
                }
            }
            NodeData::Element(_) => {
                let Some(child_tag) = tree.name(child).map(str::to_string) else {
                    continue;
                };
                let twins = children
                    .iter()
                    .filter(|&&sibling| tree.name(sibling) == Some(child_tag.as_str()))
                    .count();

                if twins == 1 {
                    if twins_as_array {
                        decode_into(tree, child, acc, false);
                    } else {
                        let slot = slot_object(acc, &tag);
                        slot.entry(child_tag.clone()).or_insert(Value::Null);
                        decode_into(tree, child, slot, false);
                    }
                } else {
                    let slot = slot_object(acc, &tag);
                    let list = slot
                        .entry(child_tag.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !list.is_array() {
                        *list = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = list {
                        match leaf_text(tree, child) {
                            Some(text) if !text.trim().is_empty() => {
                                items.push(Value::String(text.trim().to_string()));
                            }
                            Some(_) => {}
                            None => {
                                let mut fresh = Map::new();
                                decode_into(tree, child, &mut fresh, true);
                                items.push(Value::Object(fresh));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Text of an element whose only child is a text node
fn leaf_text(tree: &XmlTree, node: NodeId) -> Option<&str> {
    let children = tree.children(node);
    if children.len() == 1 {
        tree.text(children[0])
    } else {
        None
    }
}

/// Accumulator slot for `tag`, converted to a mapping if needed.
///
/// A scalar already stored in the slot migrates under `@value` so mixed
/// content keeps the text.
fn slot_object<'a>(acc: &'a mut Map<String, Value>, tag: &str) -> &'a mut Map<String, Value> {
    let entry = acc.entry(tag.to_string()).or_insert(Value::Null);
    if !entry.is_object() {
        let prior = entry.take();
        let mut map = Map::new();
        if let Value::String(text) = prior {
            map.insert(VALUE_KEY.to_string(), Value::String(text));
        }
        *entry = Value::Object(map);
    }
    match entry {
        Value::Object(map) => map,
        _ => unreachable!("slot was just converted to a mapping"),
    }
}

fn append_text_value(slot: &mut Map<String, Value>, text: &str) {
    let entry = slot.entry(VALUE_KEY.to_string()).or_insert(Value::Null);
    if let Value::String(existing) = entry {
        existing.push_str(text);
    } else {
        *entry = Value::String(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: &Value) -> &Map<String, Value> {
        value.as_object().expect("expected a mapping")
    }

    #[test]
    fn test_encode_skip_policy() {
        let data = json!({"root": {"a": null, "b": false, "c": [], "d": {}}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        assert!(doc.tree().children(root).is_empty());
    }

    #[test]
    fn test_encode_empty_string_and_true_produce_elements() {
        let data = json!({"root": {"empty": "", "flag": true}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let children = doc.tree().child_elements(root);
        assert_eq!(children.len(), 2);
        assert_eq!(doc.tree().string_value(children[0]), "");
        assert_eq!(doc.tree().string_value(children[1]), "");
    }

    #[test]
    fn test_encode_repetition_produces_siblings() {
        let data = json!({"root": {"item": ["a", "b", "c"]}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let children = doc.tree().child_elements(root);
        assert_eq!(children.len(), 3);
        for (child, expected) in children.iter().zip(["a", "b", "c"]) {
            assert_eq!(doc.tree().name(*child), Some("item"));
            assert_eq!(doc.tree().string_value(*child), expected);
        }
    }

    #[test]
    fn test_encode_attributes_and_value() {
        let data = json!({"root": {"el": {"@attributes": {"id": "1"}, "@value": "x"}}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let el = doc.tree().child_elements(root)[0];
        assert_eq!(doc.tree().attribute(el, "id"), Some("1"));
        assert_eq!(doc.tree().string_value(el), "x");
    }

    #[test]
    fn test_encode_skips_false_attribute() {
        let data = json!({"root": {"el": {"@attributes": {"id": "1", "off": false}}}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let el = doc.tree().child_elements(root)[0];
        assert_eq!(doc.tree().attribute(el, "off"), None);
        assert_eq!(doc.tree().attribute(el, "id"), Some("1"));
    }

    #[test]
    fn test_encode_rejects_non_scalar_attribute() {
        let data = json!({"root": {"el": {"@attributes": {"id": ["1"]}}}});
        let err = encode(as_map(&data), None).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }

    #[test]
    fn test_encode_rejects_sequence_of_sequences() {
        let data = json!({"root": {"item": [["a", "b"]]}});
        let err = encode(as_map(&data), None).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }

    #[test]
    fn test_encode_rejects_second_root() {
        let data = json!({"first": "a", "second": "b"});
        let err = encode(as_map(&data), None).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }

    #[test]
    fn test_encode_strips_control_characters() {
        let data = json!({"root": {"k": "be\u{07}ll"}});
        let doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let el = doc.tree().child_elements(root)[0];
        assert_eq!(doc.tree().string_value(el), "bell");
    }

    #[test]
    fn test_encode_namespace_declared_on_root() {
        let ns = XmlNamespace::prefixed("urn:example:invoice", "inv");
        let data = json!({"Invoice": {"Total": "100"}});
        let doc = encode(as_map(&data), Some(&ns)).unwrap();
        let root = doc.tree().root().unwrap();
        assert_eq!(doc.tree().name(root), Some("inv:Invoice"));
        assert_eq!(
            doc.tree().attribute(root, "xmlns:inv"),
            Some("urn:example:invoice")
        );
        let child = doc.tree().child_elements(root)[0];
        assert_eq!(doc.tree().name(child), Some("inv:Total"));
    }

    #[test]
    fn test_encode_into_existing_parent() {
        let data = json!({"root": {"a": "1"}});
        let mut doc = encode(as_map(&data), None).unwrap();
        let root = doc.tree().root().unwrap();
        let extra = json!({"b": "2"});
        encode_into(&mut doc, Some(root), as_map(&extra), None).unwrap();
        assert_eq!(doc.tree().child_elements(root).len(), 2);
    }

    #[test]
    fn test_decode_scalar_child() {
        let tree = XmlTree::parse("<root><name>Ana</name></root>").unwrap();
        assert_eq!(decode(&tree), json!({"root": {"name": "Ana"}}));
    }

    #[test]
    fn test_decode_empty_root() {
        let tree = XmlTree::parse("<root/>").unwrap();
        assert_eq!(decode(&tree), json!({"root": null}));
    }

    #[test]
    fn test_decode_empty_tree() {
        let tree = XmlTree::new();
        assert_eq!(decode(&tree), json!({}));
    }

    #[test]
    fn test_decode_attributes_and_value() {
        let tree = XmlTree::parse(r#"<root><el id="1">x</el></root>"#).unwrap();
        assert_eq!(
            decode(&tree),
            json!({"root": {"el": {"@attributes": {"id": "1"}, "@value": "x"}}})
        );
    }

    #[test]
    fn test_decode_twins_aggregate_to_sequence() {
        let tree =
            XmlTree::parse("<root><item>a</item><item>b</item><item>c</item></root>").unwrap();
        assert_eq!(decode(&tree), json!({"root": {"item": ["a", "b", "c"]}}));
    }

    #[test]
    fn test_decode_complex_twins() {
        let xml = "<root><item><x>1</x></item><item><x>2</x></item></root>";
        let tree = XmlTree::parse(xml).unwrap();
        assert_eq!(
            decode(&tree),
            json!({"root": {"item": [{"x": "1"}, {"x": "2"}]}})
        );
    }

    #[test]
    fn test_decode_mixed_content_aggregates_value() {
        let tree = XmlTree::parse("<root>pre<b>bold</b>post</root>").unwrap();
        assert_eq!(
            decode(&tree),
            json!({"root": {"@value": "prepost", "b": "bold"}})
        );
    }

    #[test]
    fn test_round_trip_nested() {
        let data = json!({
            "Invoice": {
                "Header": {
                    "@attributes": {"version": "4.3"},
                    "@value": "hdr"
                },
                "Line": ["first", "second"],
                "Total": "123.45"
            }
        });
        let doc = encode(as_map(&data), None).unwrap();
        assert_eq!(decode(doc.tree()), data);
    }

    #[test]
    fn test_decode_node_relative() {
        let tree = XmlTree::parse("<root><sub><k>v</k></sub></root>").unwrap();
        let root = tree.root().unwrap();
        let sub = tree.child_elements(root)[0];
        assert_eq!(decode_node(&tree, sub, false), json!({"sub": {"k": "v"}}));
    }
}
