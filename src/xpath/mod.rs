//! XPath query and projection layer
//!
//! Wraps the step evaluator with the conveniences callers use directly:
//! parameterized queries with safely quoted literals, namespace-optional
//! matching (bare tag steps rewritten to `local-name()` tests when no
//! namespaces are registered), context-relative evaluation, and recursive
//! node-to-value projection with duplicate-name aggregation.

mod eval;

pub use eval::NodeRef;

use crate::error::{Error, Result};
use crate::tree::{NodeId, XmlTree};
use serde_json::map::Entry;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Namespace prefix registrations for qualified matching
pub type NamespaceMap = HashMap<String, String>;

/// Query engine bound to one parsed document.
///
/// With a non-empty namespace map every registered prefix participates in
/// qualified matching; with an empty map namespace matching is disabled and
/// bare tag steps match by local name, so unprefixed queries still work
/// against namespaced documents.
#[derive(Debug)]
pub struct XPathQuery {
    tree: XmlTree,
    namespaces: NamespaceMap,
}

impl XPathQuery {
    /// Parse XML text and bind a query engine to it
    pub fn parse(xml: &str) -> Result<Self> {
        Self::parse_with_namespaces(xml, NamespaceMap::new())
    }

    /// Parse XML text and register namespace prefixes for qualified matching
    pub fn parse_with_namespaces(xml: &str, namespaces: NamespaceMap) -> Result<Self> {
        let tree = XmlTree::parse(xml).map_err(|e| Error::InvalidXml(e.to_string()))?;
        Ok(Self { tree, namespaces })
    }

    /// Bind a query engine to an existing tree
    pub fn new(tree: XmlTree, namespaces: NamespaceMap) -> Self {
        Self { tree, namespaces }
    }

    /// The underlying tree
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    /// Resolve and evaluate a query, returning the matched nodes.
    pub fn get_nodes(
        &self,
        query: &str,
        params: &[(&str, &str)],
        context: Option<NodeId>,
    ) -> Result<Vec<NodeRef>> {
        run_query(&self.tree, &self.namespaces, query, params, context)
    }

    /// Evaluate a query and project the result.
    ///
    /// Zero matches yield `Null`, one match projects to a scalar or mapping,
    /// several matches to an ordered list of projections.
    pub fn get(
        &self,
        query: &str,
        params: &[(&str, &str)],
        context: Option<NodeId>,
    ) -> Result<Value> {
        let nodes = self.get_nodes(query, params, context)?;
        Ok(project_nodes(&self.tree, nodes))
    }

    /// Evaluate a query and return the plain string values of all matches.
    pub fn get_values(
        &self,
        query: &str,
        params: &[(&str, &str)],
        context: Option<NodeId>,
    ) -> Result<Vec<String>> {
        let nodes = self.get_nodes(query, params, context)?;
        Ok(nodes.iter().map(|n| n.string_value(&self.tree)).collect())
    }

    /// Evaluate a query and return the first match's string value.
    pub fn get_value(
        &self,
        query: &str,
        params: &[(&str, &str)],
        context: Option<NodeId>,
    ) -> Result<Option<String>> {
        Ok(self.get_values(query, params, context)?.into_iter().next())
    }
}

/// Resolve placeholders, apply namespace-optional rewriting, evaluate.
pub(crate) fn run_query(
    tree: &XmlTree,
    namespaces: &NamespaceMap,
    query: &str,
    params: &[(&str, &str)],
    context: Option<NodeId>,
) -> Result<Vec<NodeRef>> {
    let resolved = resolve_params(query, params);
    let rewritten = if namespaces.is_empty() {
        rewrite_local_names(&resolved)
    } else {
        resolved
    };
    let compiled = eval::compile(&rewritten)?;
    eval::evaluate(tree, &compiled, context, namespaces)
}

/// Project matched nodes per the zero/one/many convention.
pub(crate) fn project_nodes(tree: &XmlTree, nodes: Vec<NodeRef>) -> Value {
    match nodes.len() {
        0 => Value::Null,
        1 => project_ref(tree, &nodes[0]),
        _ => Value::Array(nodes.iter().map(|n| project_ref(tree, n)).collect()),
    }
}

fn project_ref(tree: &XmlTree, node: &NodeRef) -> Value {
    match node {
        NodeRef::Element(id) => project_node(tree, *id),
        other => Value::String(other.string_value(tree)),
    }
}

/// Project an element into a scalar or nested mapping.
///
/// An element without element children projects to its text value. With
/// element children, each tag's first occurrence stores the child projection
/// directly; a second occurrence converts the slot into a two-element list
/// and later occurrences append, preserving document order.
pub fn project_node(tree: &XmlTree, node: NodeId) -> Value {
    let children = tree.child_elements(node);
    if children.is_empty() {
        return Value::String(tree.string_value(node));
    }

    let mut map = Map::new();
    for child in children {
        let tag = tree.name(child).unwrap_or_default().to_string();
        let projected = project_node(tree, child);
        match map.entry(tag) {
            Entry::Vacant(slot) => {
                slot.insert(projected);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if let Value::Array(items) = existing {
                    items.push(projected);
                } else {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, projected]);
                }
            }
        }
    }
    Value::Object(map)
}

/// Build a properly quoted XPath string literal for `value`.
///
/// Plain single quotes when the value has none; double quotes when it has
/// single but no double quotes; otherwise a `concat()` expression splicing
/// single- and double-quoted fragments.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    if !value.contains('"') {
        return format!("\"{}\"", value);
    }
    let mut parts = Vec::new();
    for (index, segment) in value.split('\'').enumerate() {
        if index > 0 {
            parts.push("\"'\"".to_string());
        }
        if !segment.is_empty() {
            parts.push(format!("'{}'", segment));
        }
    }
    format!("concat({})", parts.join(", "))
}

/// Replace `:name` placeholders with quoted literals, longest names first
/// so one parameter name never clobbers a longer one it prefixes.
pub(crate) fn resolve_params(query: &str, params: &[(&str, &str)]) -> String {
    let mut ordered: Vec<&(&str, &str)> = params.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut resolved = query.to_string();
    for (name, value) in ordered {
        let placeholder = format!(":{}", name);
        resolved = resolved.replace(&placeholder, &xpath_literal(value));
    }
    resolved
}

/// Rewrite bare tag steps to `*[local-name()="tag"]` tests.
///
/// Applied when namespace matching is disabled, so queries written without
/// prefixes match namespaced documents. Steps that are not plain names
/// (attribute tests, wildcards, `.`/`..`, functions) pass through; a step's
/// predicates are kept behind the rewritten test.
pub(crate) fn rewrite_local_names(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut step = String::new();

    let mut flush = |step: &mut String, out: &mut String| {
        out.push_str(&rewrite_step(step));
        step.clear();
    };

    for c in query.chars() {
        if let Some(q) = quote {
            step.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                step.push(c);
            }
            '[' => {
                depth += 1;
                step.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                step.push(c);
            }
            '/' if depth == 0 => {
                flush(&mut step, &mut out);
                out.push('/');
            }
            _ => step.push(c),
        }
    }
    flush(&mut step, &mut out);
    out
}

fn rewrite_step(step: &str) -> String {
    if step.is_empty() {
        return String::new();
    }
    let (name, predicates) = match step.find('[') {
        Some(pos) => (&step[..pos], &step[pos..]),
        None => (step, ""),
    };
    if is_bare_name(name) {
        format!("*[local-name()=\"{}\"]{}", name, predicates)
    } else {
        step.to_string()
    }
}

fn is_bare_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(':')
        && !name.contains('(')
        && name
            .chars()
            .next()
            .map(|c| c.is_alphabetic() || c == '_')
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_single_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
    }

    #[test]
    fn test_literal_switches_to_double_quotes() {
        assert_eq!(xpath_literal("it's"), "\"it's\"");
    }

    #[test]
    fn test_literal_concat_for_both_quote_kinds() {
        assert_eq!(
            xpath_literal("a'b\"c"),
            "concat('a', \"'\", 'b\"c')"
        );
    }

    #[test]
    fn test_resolve_params_longest_first() {
        let resolved = resolve_params("/r/a[@id=:id2]/b[@id=:id]", &[("id", "x"), ("id2", "y")]);
        assert_eq!(resolved, "/r/a[@id='y']/b[@id='x']");
    }

    #[test]
    fn test_rewrite_bare_steps() {
        assert_eq!(
            rewrite_local_names("/Invoice/Total"),
            "/*[local-name()=\"Invoice\"]/*[local-name()=\"Total\"]"
        );
    }

    #[test]
    fn test_rewrite_keeps_predicates() {
        assert_eq!(
            rewrite_local_names("/r/item[2]"),
            "/*[local-name()=\"r\"]/*[local-name()=\"item\"][2]"
        );
    }

    #[test]
    fn test_rewrite_skips_special_steps() {
        assert_eq!(rewrite_local_names("//*"), "//*");
        assert_eq!(rewrite_local_names("./a/@id"), "./*[local-name()=\"a\"]/@id");
        assert_eq!(rewrite_local_names("/a/text()"), "/*[local-name()=\"a\"]/text()");
    }

    #[test]
    fn test_rewrite_leaves_slash_inside_literal() {
        let q = "/r[.='a/b']";
        assert_eq!(rewrite_local_names(q), "/*[local-name()=\"r\"][.='a/b']");
    }

    #[test]
    fn test_get_matches_namespaced_document_without_prefixes() {
        let xml = r#"<i:Invoice xmlns:i="urn:inv"><i:Total>10</i:Total></i:Invoice>"#;
        let query = XPathQuery::parse(xml).unwrap();
        assert_eq!(query.get("/Invoice/Total", &[], None).unwrap(), json!("10"));
    }

    #[test]
    fn test_namespace_aware_matching() {
        let xml = r#"<i:Invoice xmlns:i="urn:inv" xmlns:o="urn:other">
            <i:Total>10</i:Total><o:Total>99</o:Total></i:Invoice>"#;
        let mut ns = NamespaceMap::new();
        ns.insert("inv".to_string(), "urn:inv".to_string());
        let query = XPathQuery::parse_with_namespaces(xml, ns).unwrap();
        assert_eq!(
            query.get_values("/inv:Invoice/inv:Total", &[], None).unwrap(),
            ["10"]
        );
    }

    #[test]
    fn test_get_zero_matches_is_null() {
        let query = XPathQuery::parse("<r><a>1</a></r>").unwrap();
        assert_eq!(query.get("/r/missing", &[], None).unwrap(), Value::Null);
    }

    #[test]
    fn test_get_many_matches_is_list() {
        let query = XPathQuery::parse("<r><a>1</a><a>2</a></r>").unwrap();
        assert_eq!(query.get("/r/a", &[], None).unwrap(), json!(["1", "2"]));
    }

    #[test]
    fn test_parameterized_query_with_both_quotes() {
        let xml = "<r><a>d'Arcy \"q\"</a><a>other</a></r>";
        let query = XPathQuery::parse(xml).unwrap();
        let value = "d'Arcy \"q\"";
        assert_eq!(
            query.get_values("/r/a[.=:v]", &[("v", value)], None).unwrap(),
            [value]
        );
    }

    #[test]
    fn test_projection_duplicate_siblings() {
        let query = XPathQuery::parse("<r><i>1</i><i>2</i><i>3</i><x>s</x></r>").unwrap();
        assert_eq!(
            query.get("/r", &[], None).unwrap(),
            json!({"i": ["1", "2", "3"], "x": "s"})
        );
    }

    #[test]
    fn test_projection_single_occurrence_stays_scalar() {
        let query = XPathQuery::parse("<r><only><k>v</k></only></r>").unwrap();
        assert_eq!(
            query.get("/r", &[], None).unwrap(),
            json!({"only": {"k": "v"}})
        );
    }

    #[test]
    fn test_get_value_first_match() {
        let query = XPathQuery::parse("<r><a>1</a><a>2</a></r>").unwrap();
        assert_eq!(query.get_value("/r/a", &[], None).unwrap().as_deref(), Some("1"));
        assert_eq!(query.get_value("/r/none", &[], None).unwrap(), None);
    }

    #[test]
    fn test_construction_rejects_bad_xml() {
        assert!(matches!(
            XPathQuery::parse("<r><unclosed></r>"),
            Err(Error::InvalidXml(_))
        ));
    }

    #[test]
    fn test_context_relative_query() {
        let query = XPathQuery::parse("<r><s><k>in</k></s><k>out</k></r>").unwrap();
        let root = query.tree().root().unwrap();
        let s = query.tree().child_elements(root)[0];
        assert_eq!(query.get_values("k", &[], Some(s)).unwrap(), ["in"]);
    }
}
