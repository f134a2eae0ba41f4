//! XML document facade
//!
//! A [`Document`] owns one element tree plus its declared version and
//! working encoding, and carries the load/save/canonicalize lifecycle:
//! bytes are decoded from the declared encoding on load, and serialization
//! re-applies entity fixing and re-expresses the text in the working
//! single-byte encoding so the output stays byte-compatible with signature
//! canonicalization.
//!
//! Documents are append-then-freeze: build or load the tree first, then
//! query. The structured projection ([`Document::to_value`]) is computed
//! once on first access and never invalidated, so tree mutations after the
//! first structured read are not reflected in it.

use crate::canon::{self, C14nMode};
use crate::codec;
use crate::encoding::{self, DEFAULT_ENCODING};
use crate::error::{Diagnostic, Error, Result};
use crate::serialize;
use crate::text::fix_entities;
use crate::tree::{NodeId, XmlTree};
use crate::xpath::{self, NamespaceMap, NodeRef};
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};

/// Collaborator seam for XSD validation.
///
/// Implementations own their schema engine and message dictionaries; the
/// document only hands over itself and a resolved schema path.
pub trait SchemaValidator {
    /// Validate `document` against the schema at `schema_path`.
    fn validate(
        &self,
        document: &Document,
        schema_path: &str,
    ) -> std::result::Result<(), Vec<Diagnostic>>;
}

/// An XML document with version/encoding metadata and query support
#[derive(Debug)]
pub struct Document {
    tree: XmlTree,
    version: String,
    encoding: String,
    namespaces: NamespaceMap,
    projection: OnceCell<Value>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with default metadata
    pub fn new() -> Self {
        Self {
            tree: XmlTree::new(),
            version: "1.0".to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
            namespaces: NamespaceMap::new(),
            projection: OnceCell::new(),
        }
    }

    /// Set the working (output) encoding label
    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    /// Register namespace prefixes for qualified query matching
    pub fn with_namespaces(mut self, namespaces: NamespaceMap) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Load a document from raw bytes.
    ///
    /// The declared encoding (UTF-8 when the declaration is absent) drives
    /// the byte decode; the working encoding stays at the configured
    /// single-byte default so a UTF-8 input is re-expressed on save. Empty
    /// or whitespace-only input fails with [`Error::EmptyDocument`],
    /// unparseable XML with [`Error::MalformedXml`] carrying the engine's
    /// diagnostics.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(Error::EmptyDocument);
        }
        let declared =
            encoding::declared_encoding(data).unwrap_or_else(|| "UTF-8".to_string());
        let text = encoding::decode_bytes(data, &declared)?;
        let version = encoding::declared_version(data).unwrap_or_else(|| "1.0".to_string());
        let tree = XmlTree::parse(&text)?;
        Ok(Self {
            tree,
            version,
            encoding: DEFAULT_ENCODING.to_string(),
            namespaces: NamespaceMap::new(),
            projection: OnceCell::new(),
        })
    }

    /// Load a document from an XML string already in the internal encoding
    pub fn from_str(xml: &str) -> Result<Self> {
        Self::from_bytes(xml.as_bytes())
    }

    /// Build a document by encoding a nested mapping
    pub fn from_value(
        data: &Map<String, Value>,
        namespace: Option<&codec::XmlNamespace>,
    ) -> Result<Self> {
        codec::encode(data, namespace)
    }

    /// Declared XML version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Working (output) encoding label
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Registered query namespaces
    pub fn namespaces(&self) -> &NamespaceMap {
        &self.namespaces
    }

    /// The owned tree
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    /// Mutable access to the owned tree (before the first structured read)
    pub fn tree_mut(&mut self) -> &mut XmlTree {
        &mut self.tree
    }

    /// Root element handle
    pub fn root(&self) -> Option<NodeId> {
        self.tree.root()
    }

    /// Serialize to an XML string (internal encoding) with entity fixing
    pub fn to_xml_string(&self) -> Result<String> {
        let xml = serialize::to_xml_string(&self.tree, &self.version, &self.encoding)?;
        Ok(fix_entities(&xml))
    }

    /// Serialize to bytes in the working encoding
    pub fn save(&self) -> Result<Vec<u8>> {
        let xml = self.to_xml_string()?;
        encoding::encode_string(&xml, &self.encoding)
    }

    /// Canonical form of the document or of an XPath-selected subtree.
    ///
    /// The canonical rendering is produced in UTF-8, entity fixing is
    /// re-applied, and the result is transcoded to the working encoding.
    /// A subset query that matches no element fails with
    /// [`Error::XPathNodeNotFound`].
    pub fn c14n(&self, subset: Option<&str>, mode: C14nMode) -> Result<Vec<u8>> {
        let apex = match subset {
            Some(query) => {
                let nodes = xpath::run_query(&self.tree, &self.namespaces, query, &[], None)?;
                nodes
                    .iter()
                    .find_map(NodeRef::as_element)
                    .ok_or_else(|| Error::XPathNodeNotFound(query.to_string()))?
            }
            None => self
                .tree
                .root()
                .ok_or_else(|| Error::XPathNodeNotFound("document has no root element".to_string()))?,
        };
        let canonical = canon::canonicalize(&self.tree, apex, mode);
        let fixed = fix_entities(&canonical);
        encoding::encode_string(&fixed, &self.encoding)
    }

    /// Structured projection of the whole document, computed once.
    pub fn to_value(&self) -> &Value {
        self.projection.get_or_init(|| codec::decode(&self.tree))
    }

    /// Dot-path access into the structured projection.
    ///
    /// Segments name mapping keys; numeric segments index sequences:
    /// `doc.get("Invoice.Line.0.Amount")`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.to_value();
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Namespace declarations on the root element (prefix -> URI, default
    /// namespace under the empty prefix)
    pub fn xmlns_declarations(&self) -> NamespaceMap {
        let mut map = NamespaceMap::new();
        if let Some(attrs) = self.tree.root().and_then(|root| self.tree.attributes(root)) {
            for (key, value) in attrs {
                if key == "xmlns" {
                    map.insert(String::new(), value.clone());
                } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                    map.insert(prefix.to_string(), value.clone());
                }
            }
        }
        map
    }

    /// Schema path hinted by the root element.
    ///
    /// Reads `xsi:schemaLocation` (last whitespace-separated token, the
    /// location of the final namespace/location pair) or
    /// `xsi:noNamespaceSchemaLocation`.
    pub fn schema_location_hint(&self) -> Option<String> {
        let attrs = self.tree.root().and_then(|root| self.tree.attributes(root))?;
        for (key, value) in attrs {
            let local = key.rsplit_once(':').map(|(_, l)| l).unwrap_or(key);
            if local == "schemaLocation" || local == "noNamespaceSchemaLocation" {
                return value.split_whitespace().last().map(str::to_string);
            }
        }
        None
    }

    /// Validate against a schema through the validator collaborator.
    ///
    /// The schema path falls back to [`Self::schema_location_hint`] when not
    /// supplied explicitly.
    pub fn validate_schema<V: SchemaValidator>(
        &self,
        validator: &V,
        schema_path: Option<&str>,
    ) -> Result<()> {
        let resolved = match schema_path {
            Some(path) => path.to_string(),
            None => self.schema_location_hint().ok_or_else(|| {
                Error::SchemaValidation(vec![Diagnostic::new(
                    "no schema location declared or supplied",
                )])
            })?,
        };
        validator
            .validate(self, &resolved)
            .map_err(Error::SchemaValidation)
    }

    /// Resolve and evaluate a query against this document.
    pub fn query_nodes(
        &self,
        query: &str,
        params: &[(&str, &str)],
        context: Option<NodeId>,
    ) -> Result<Vec<NodeRef>> {
        xpath::run_query(&self.tree, &self.namespaces, query, params, context)
    }

    /// Evaluate a query and project the result (null / single / list).
    pub fn query(&self, query: &str, params: &[(&str, &str)]) -> Result<Value> {
        let nodes = self.query_nodes(query, params, None)?;
        Ok(xpath::project_nodes(&self.tree, nodes))
    }

    /// Evaluate a query and return the string values of all matches.
    pub fn query_values(&self, query: &str, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let nodes = self.query_nodes(query, params, None)?;
        Ok(nodes.iter().map(|n| n.string_value(&self.tree)).collect())
    }

    /// Evaluate a query and return the first match's string value.
    pub fn query_value(&self, query: &str, params: &[(&str, &str)]) -> Result<Option<String>> {
        Ok(self.query_values(query, params)?.into_iter().next())
    }
}
