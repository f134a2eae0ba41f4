//! Canonical-form rendering
//!
//! Produces the canonical serialization of a subtree in UTF-8: no XML
//! declaration, empty elements expanded, namespace declarations and
//! attributes in canonical order, canonical entity escaping. The inclusive
//! mode propagates every in-scope namespace binding onto the apex element;
//! the exclusive mode only renders bindings whose prefix is visibly
//! utilized by the element or its attributes.

use crate::tree::{NodeData, NodeId, XmlTree};
use std::collections::HashMap;

/// Canonicalization flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum C14nMode {
    /// Propagate all in-scope namespace bindings onto the apex
    #[default]
    Inclusive,
    /// Render only visibly utilized namespace bindings
    Exclusive,
}

/// Escape text node content per canonical rules.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape attribute values per canonical rules.
fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Namespace bindings in scope at `node`, nearest declaration winning.
fn in_scope_bindings(tree: &XmlTree, node: NodeId) -> HashMap<String, String> {
    let mut bindings: HashMap<String, String> = HashMap::new();
    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        chain.push(id);
        current = tree.parent(id);
    }
    // walk outermost-first so inner declarations override
    for id in chain.into_iter().rev() {
        if let Some(element) = tree.element(id) {
            for (key, value) in &element.attributes {
                if key == "xmlns" {
                    bindings.insert(String::new(), value.clone());
                } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                    bindings.insert(prefix.to_string(), value.clone());
                }
            }
            if let Some(uri) = &element.namespace {
                let prefix = element
                    .name
                    .split_once(':')
                    .map(|(p, _)| p)
                    .unwrap_or("");
                bindings.entry(prefix.to_string()).or_insert_with(|| uri.clone());
            }
        }
    }
    bindings
}

fn prefix_of(name: &str) -> &str {
    name.split_once(':').map(|(p, _)| p).unwrap_or("")
}

/// Canonicalize the subtree rooted at `apex` to a UTF-8 string.
pub fn canonicalize(tree: &XmlTree, apex: NodeId, mode: C14nMode) -> String {
    let mut out = String::new();
    let rendered = HashMap::new();
    render_element(tree, apex, mode, true, &rendered, &mut out);
    out
}

fn render_element(
    tree: &XmlTree,
    id: NodeId,
    mode: C14nMode,
    is_apex: bool,
    rendered: &HashMap<String, String>,
    out: &mut String,
) {
    let Some(element) = tree.element(id) else {
        return;
    };
    let in_scope = in_scope_bindings(tree, id);

    // decide which bindings this element must declare
    let mut wanted: Vec<(String, String)> = Vec::new();
    match mode {
        C14nMode::Inclusive => {
            let candidates: Vec<(&String, &String)> = if is_apex {
                in_scope.iter().collect()
            } else {
                in_scope
                    .iter()
                    .filter(|(prefix, _)| {
                        element.attributes.contains_key(&declaration_key(prefix))
                            || element
                                .namespace
                                .as_ref()
                                .map(|_| prefix.as_str() == prefix_of(&element.name))
                                .unwrap_or(false)
                    })
                    .collect()
            };
            for (prefix, uri) in candidates {
                if rendered.get(prefix) != Some(uri) {
                    wanted.push((prefix.clone(), uri.clone()));
                }
            }
        }
        C14nMode::Exclusive => {
            let mut utilized: Vec<&str> = vec![prefix_of(&element.name)];
            for key in element.attributes.keys() {
                if key != "xmlns" && !key.starts_with("xmlns:") && key.contains(':') {
                    utilized.push(prefix_of(key));
                }
            }
            for prefix in utilized {
                if let Some(uri) = in_scope.get(prefix) {
                    if rendered.get(prefix) != Some(uri) {
                        wanted.push((prefix.to_string(), uri.clone()));
                    }
                }
            }
        }
    }
    // default namespace first, then by prefix
    wanted.sort_by(|a, b| match (a.0.is_empty(), b.0.is_empty()) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.0.cmp(&b.0),
    });
    wanted.dedup();

    let mut scope = rendered.clone();
    for (prefix, uri) in &wanted {
        scope.insert(prefix.clone(), uri.clone());
    }

    // regular attributes in canonical order
    let mut attrs: Vec<(&String, &String)> = element
        .attributes
        .iter()
        .filter(|(key, _)| *key != "xmlns" && !key.starts_with("xmlns:"))
        .collect();
    attrs.sort_by(|a, b| {
        let (ap, bp) = (a.0.contains(':'), b.0.contains(':'));
        match (ap, bp) {
            (false, true) => std::cmp::Ordering::Less,
            (true, false) => std::cmp::Ordering::Greater,
            _ => a.0.cmp(b.0),
        }
    });

    out.push('<');
    out.push_str(&element.name);
    for (prefix, uri) in &wanted {
        out.push(' ');
        out.push_str(&declaration_key(prefix));
        out.push_str("=\"");
        out.push_str(&escape_attr(uri));
        out.push('"');
    }
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');

    for &child in tree.children(id) {
        match tree.node(child) {
            NodeData::Text(text) => out.push_str(&escape_text(text)),
            NodeData::Element(_) => render_element(tree, child, mode, false, &scope, out),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn declaration_key(prefix: &str) -> String {
    if prefix.is_empty() {
        "xmlns".to_string()
    } else {
        format!("xmlns:{}", prefix)
    }
}
