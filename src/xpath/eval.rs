//! XPath step compilation and evaluation
//!
//! The evaluator the query wrapper drives. Queries compile to a sequence of
//! steps (axis + node test + predicates) evaluated against the arena tree.
//! The supported subset covers child and descendant axes, name/wildcard/
//! `text()`/attribute tests, and positional, attribute, child-value,
//! self-value and `local-name()` predicates. Anything outside the subset is
//! rejected with a diagnostic naming the construct — never answered wrong.

use crate::error::{Error, Result};
use crate::tree::{NodeData, NodeId, XmlTree};
use std::collections::HashMap;

/// A node produced by query evaluation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeRef {
    /// An element node
    Element(NodeId),
    /// A text node
    Text(NodeId),
    /// An attribute of an element
    Attribute {
        /// Element owning the attribute
        owner: NodeId,
        /// Attribute name
        name: String,
    },
}

impl NodeRef {
    /// Element handle when the result is an element
    pub fn as_element(&self) -> Option<NodeId> {
        match self {
            NodeRef::Element(id) => Some(*id),
            _ => None,
        }
    }

    /// String value of the result (text content or attribute value)
    pub fn string_value(&self, tree: &XmlTree) -> String {
        match self {
            NodeRef::Element(id) | NodeRef::Text(id) => tree.string_value(*id),
            NodeRef::Attribute { owner, name } => tree
                .attribute(*owner, name)
                .map(str::to_string)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Wildcard,
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    AttrPresent(String),
    AttrEq(String, String),
    ChildEq(String, String),
    SelfEq(String),
    LocalName(String),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled query path
#[derive(Debug, Clone)]
pub(crate) struct CompiledPath {
    absolute: bool,
    steps: Vec<Step>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidXPath(message.into())
}

fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_qname(s: &str) -> bool {
    match s.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(s),
    }
}

/// Split a path into `(descendant_axis, raw_step)` pairs, honoring
/// brackets and quoted literals.
fn split_steps(path: &str) -> Result<(bool, Vec<(bool, &str)>)> {
    let mut rest = path.trim();
    if rest.is_empty() {
        return Err(invalid("empty query"));
    }
    let absolute = rest.starts_with('/');
    let mut descendant = false;
    if rest.starts_with("//") {
        descendant = true;
        rest = &rest[2..];
    } else if absolute {
        rest = &rest[1..];
    }

    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    let bytes = rest.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else {
            match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => {
                    let step = &rest[start..i];
                    if step.is_empty() {
                        return Err(invalid(format!("empty step in '{}'", path)));
                    }
                    steps.push((descendant, step));
                    if i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                        descendant = true;
                        i += 1;
                    } else {
                        descendant = false;
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    if quote.is_some() {
        return Err(invalid(format!("unterminated string literal in '{}'", path)));
    }
    let last = &rest[start..];
    if last.is_empty() {
        return Err(invalid(format!("trailing '/' in '{}'", path)));
    }
    steps.push((descendant, last));
    Ok((absolute, steps))
}

/// Compile a resolved query string into steps.
pub(crate) fn compile(query: &str) -> Result<CompiledPath> {
    let (absolute, raw_steps) = split_steps(query)?;
    let mut steps = Vec::with_capacity(raw_steps.len());
    for (descendant, raw) in raw_steps {
        steps.push(parse_step(raw, descendant)?);
    }
    Ok(CompiledPath { absolute, steps })
}

fn parse_step(raw: &str, descendant: bool) -> Result<Step> {
    let axis = if descendant { Axis::Descendant } else { Axis::Child };
    let raw = raw.trim();

    if raw == "." {
        return Ok(Step {
            axis: Axis::SelfNode,
            test: NodeTest::Wildcard,
            predicates: Vec::new(),
        });
    }
    if raw == ".." {
        return Ok(Step {
            axis: Axis::Parent,
            test: NodeTest::Wildcard,
            predicates: Vec::new(),
        });
    }
    if let Some(name) = raw.strip_prefix('@') {
        if name == "*" || is_qname(name) {
            return Ok(Step {
                axis,
                test: NodeTest::Attribute(name.to_string()),
                predicates: Vec::new(),
            });
        }
        return Err(invalid(format!("invalid attribute test '@{}'", name)));
    }

    let (name_part, predicates_part) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };

    let test = match name_part {
        "*" => NodeTest::Wildcard,
        "text()" => NodeTest::Text,
        name if is_qname(name) => NodeTest::Name(name.to_string()),
        other => return Err(invalid(format!("unsupported step '{}'", other))),
    };

    let mut predicates = Vec::new();
    for body in predicate_bodies(predicates_part)? {
        predicates.push(parse_predicate(body)?);
    }
    Ok(Step {
        axis,
        test,
        predicates,
    })
}

/// Split `[a][b]...` into the bracket bodies.
fn predicate_bodies(s: &str) -> Result<Vec<&str>> {
    let mut bodies = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(format!("malformed predicate list '{}'", s)));
        }
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in rest.char_indices() {
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| invalid(format!("unbalanced predicate in '{}'", s)))?;
        bodies.push(&rest[1..end]);
        rest = &rest[end + 1..];
    }
    Ok(bodies)
}

fn parse_predicate(body: &str) -> Result<Predicate> {
    let body = body.trim();
    if body.is_empty() {
        return Err(invalid("empty predicate"));
    }
    if let Ok(position) = body.parse::<usize>() {
        if position == 0 {
            return Err(invalid("position predicates are 1-based"));
        }
        return Ok(Predicate::Position(position));
    }
    if body == "last()" {
        return Ok(Predicate::Last);
    }
    if let Some(rest) = body.strip_prefix("local-name()") {
        let value = parse_eq_literal(rest, body)?;
        return Ok(Predicate::LocalName(value));
    }
    if let Some(rest) = body.strip_prefix('@') {
        return match rest.find('=') {
            Some(pos) => {
                let name = rest[..pos].trim();
                if !is_qname(name) {
                    return Err(invalid(format!("invalid attribute name '@{}'", name)));
                }
                let value = parse_literal(rest[pos + 1..].trim())?;
                Ok(Predicate::AttrEq(name.to_string(), value))
            }
            None => {
                let name = rest.trim();
                if !is_qname(name) {
                    return Err(invalid(format!("invalid attribute name '@{}'", name)));
                }
                Ok(Predicate::AttrPresent(name.to_string()))
            }
        };
    }
    if let Some(rest) = body.strip_prefix('.') {
        let value = parse_eq_literal(rest, body)?;
        return Ok(Predicate::SelfEq(value));
    }
    if let Some(pos) = body.find('=') {
        let name = body[..pos].trim();
        if is_qname(name) {
            let value = parse_literal(body[pos + 1..].trim())?;
            return Ok(Predicate::ChildEq(name.to_string(), value));
        }
    }
    Err(invalid(format!("unsupported predicate '[{}]'", body)))
}

fn parse_eq_literal(rest: &str, body: &str) -> Result<String> {
    let rest = rest.trim();
    let Some(literal) = rest.strip_prefix('=') else {
        return Err(invalid(format!("unsupported predicate '[{}]'", body)));
    };
    parse_literal(literal.trim())
}

/// Parse a string literal operand: a quoted string or a `concat(...)` of
/// quoted strings (how values containing both quote kinds are spliced).
fn parse_literal(s: &str) -> Result<String> {
    if let Some(inner) = s.strip_prefix("concat(").and_then(|r| r.strip_suffix(')')) {
        let mut out = String::new();
        for part in split_concat_args(inner)? {
            out.push_str(&parse_quoted(part.trim())?);
        }
        return Ok(out);
    }
    parse_quoted(s)
}

fn split_concat_args(s: &str) -> Result<Vec<&str>> {
    let mut args = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            ',' => {
                args.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(invalid(format!("unterminated literal in concat({})", s)));
    }
    args.push(&s[start..]);
    Ok(args)
}

fn parse_quoted(s: &str) -> Result<String> {
    let mut chars = s.chars();
    let quote = chars.next();
    match quote {
        Some(q @ ('\'' | '"')) if s.len() >= 2 && s.ends_with(q) => {
            let inner = &s[1..s.len() - 1];
            if inner.contains(q) {
                return Err(invalid(format!("malformed string literal {}", s)));
            }
            Ok(inner.to_string())
        }
        _ => Err(invalid(format!("expected string literal, found '{}'", s))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Context {
    Document,
    Node(NodeId),
}

/// Evaluate a compiled path against a tree.
///
/// Relative paths start at `context` (the root element when absent);
/// absolute paths always start at the document.
pub(crate) fn evaluate(
    tree: &XmlTree,
    path: &CompiledPath,
    context: Option<NodeId>,
    namespaces: &HashMap<String, String>,
) -> Result<Vec<NodeRef>> {
    let mut current: Vec<Context> = if path.absolute {
        vec![Context::Document]
    } else {
        match context.or_else(|| tree.root()) {
            Some(node) => vec![Context::Node(node)],
            None => return Ok(Vec::new()),
        }
    };

    let mut attribute_results: Vec<NodeRef> = Vec::new();
    for (index, step) in path.steps.iter().enumerate() {
        let is_last = index + 1 == path.steps.len();
        let mut next: Vec<Context> = Vec::new();

        for &ctx in &current {
            match &step.test {
                NodeTest::Attribute(name) => {
                    if !is_last {
                        return Err(invalid("attribute step must be the final step"));
                    }
                    let Context::Node(node) = ctx else { continue };
                    // `@name` reads the context node; `//@name` sweeps the subtree
                    let targets: Vec<NodeId> = match step.axis {
                        Axis::Descendant => {
                            let mut all = vec![node];
                            all.extend(tree.descendants(node));
                            all.retain(|&id| tree.is_element(id));
                            all
                        }
                        _ => vec![node],
                    };
                    for target in targets {
                        collect_attributes(tree, target, name, &mut attribute_results);
                    }
                }
                NodeTest::Text => {
                    let candidates = axis_children(tree, ctx, step.axis);
                    for candidate in candidates {
                        if matches!(tree.node(candidate), NodeData::Text(_)) {
                            next.push(Context::Node(candidate));
                        }
                    }
                }
                test => {
                    let mut matched: Vec<NodeId> = Vec::new();
                    match step.axis {
                        Axis::SelfNode => {
                            if let Context::Node(node) = ctx {
                                if tree.is_element(node) {
                                    matched.push(node);
                                }
                            }
                        }
                        Axis::Parent => {
                            if let Context::Node(node) = ctx {
                                if let Some(parent) = tree.parent(node) {
                                    matched.push(parent);
                                }
                            }
                        }
                        Axis::Child | Axis::Descendant => {
                            for candidate in axis_children(tree, ctx, step.axis) {
                                if tree.is_element(candidate)
                                    && test_matches(tree, candidate, test, namespaces)?
                                {
                                    matched.push(candidate);
                                }
                            }
                        }
                    }
                    let filtered = apply_predicates(tree, matched, &step.predicates);
                    next.extend(filtered.into_iter().map(Context::Node));
                }
            }
        }

        next.sort_unstable();
        next.dedup();
        current = next;
    }

    let mut results: Vec<NodeRef> = current
        .into_iter()
        .filter_map(|ctx| match ctx {
            Context::Node(id) => match tree.node(id) {
                NodeData::Element(_) => Some(NodeRef::Element(id)),
                NodeData::Text(_) => Some(NodeRef::Text(id)),
            },
            Context::Document => None,
        })
        .collect();
    results.extend(attribute_results);
    Ok(results)
}

fn axis_children(tree: &XmlTree, ctx: Context, axis: Axis) -> Vec<NodeId> {
    match (ctx, axis) {
        (Context::Document, Axis::Child) => tree.root().into_iter().collect(),
        (Context::Document, Axis::Descendant) => match tree.root() {
            Some(root) => {
                let mut all = vec![root];
                all.extend(tree.descendants(root));
                all
            }
            None => Vec::new(),
        },
        (Context::Node(node), Axis::Child) => tree.children(node).to_vec(),
        (Context::Node(node), Axis::Descendant) => tree.descendants(node),
        _ => Vec::new(),
    }
}

fn collect_attributes(tree: &XmlTree, node: NodeId, name: &str, out: &mut Vec<NodeRef>) {
    let Some(attrs) = tree.attributes(node) else {
        return;
    };
    if name == "*" {
        for key in attrs.keys() {
            out.push(NodeRef::Attribute {
                owner: node,
                name: key.clone(),
            });
        }
    } else if attrs.contains_key(name) {
        out.push(NodeRef::Attribute {
            owner: node,
            name: name.to_string(),
        });
    }
}

fn test_matches(
    tree: &XmlTree,
    id: NodeId,
    test: &NodeTest,
    namespaces: &HashMap<String, String>,
) -> Result<bool> {
    match test {
        NodeTest::Wildcard => Ok(true),
        NodeTest::Name(name) => match name.split_once(':') {
            Some((prefix, local)) => {
                let uri = namespaces.get(prefix).ok_or_else(|| {
                    invalid(format!("undeclared namespace prefix '{}'", prefix))
                })?;
                Ok(tree.namespace(id) == Some(uri.as_str())
                    && tree.local_name(id) == Some(local))
            }
            None => Ok(tree.name(id) == Some(name.as_str())),
        },
        _ => Ok(false),
    }
}

fn apply_predicates(tree: &XmlTree, mut nodes: Vec<NodeId>, predicates: &[Predicate]) -> Vec<NodeId> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(position) => {
                if *position <= nodes.len() {
                    vec![nodes[position - 1]]
                } else {
                    Vec::new()
                }
            }
            Predicate::Last => nodes.last().copied().into_iter().collect(),
            Predicate::AttrPresent(name) => nodes
                .into_iter()
                .filter(|&id| tree.attribute(id, name).is_some())
                .collect(),
            Predicate::AttrEq(name, value) => nodes
                .into_iter()
                .filter(|&id| tree.attribute(id, name) == Some(value.as_str()))
                .collect(),
            Predicate::ChildEq(name, value) => nodes
                .into_iter()
                .filter(|&id| {
                    tree.child_elements(id).iter().any(|&child| {
                        (tree.name(child) == Some(name.as_str())
                            || tree.local_name(child) == Some(name.as_str()))
                            && tree.string_value(child) == *value
                    })
                })
                .collect(),
            Predicate::SelfEq(value) => nodes
                .into_iter()
                .filter(|&id| tree.string_value(id) == *value)
                .collect(),
            Predicate::LocalName(name) => nodes
                .into_iter()
                .filter(|&id| tree.local_name(id) == Some(name.as_str()))
                .collect(),
        };
    }
    nodes
}
