//! # fiscalxml
//!
//! XML codec, signature-grade text normalization and XPath projection for
//! fiscal e-invoicing documents.
//!
//! Built for formats where XML must be produced in a specific single-byte
//! encoding (default `ISO-8859-1`) with exact control over entity escaping,
//! so the output stays byte-compatible with canonicalization and digital
//! signature verification.
//!
//! ## Features
//!
//! - Nested value to XML encoding and back (`@attributes`/`@value`
//!   conventions, repeated elements as sequences, skip policy)
//! - Control-character stripping and entity fixing for signature pipelines
//! - Declared-encoding detection on load, single-byte transcoding on save
//! - Canonical-form rendering (inclusive or exclusive) of a document or an
//!   XPath-selected subtree
//! - Parameterized, namespace-optional XPath queries with structural
//!   projection of the results
//!
//! ## Example
//!
//! ```rust,ignore
//! use fiscalxml::Document;
//! use serde_json::json;
//!
//! let data = json!({"Invoice": {"Total": "100.00", "Line": ["a", "b"]}});
//! let doc = Document::from_value(data.as_object().unwrap(), None)?;
//! let bytes = doc.save()?;
//! let total = doc.query_value("/Invoice/Total", &[])?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;

// Text and encoding normalization
pub mod encoding;
pub mod text;

// Tree, codec and serialization
pub mod codec;
pub mod serialize;
pub mod tree;

// Canonical form
pub mod canon;

// Document facade
pub mod document;

// Query layer
pub mod xpath;

// Re-exports for convenience
pub use canon::C14nMode;
pub use codec::XmlNamespace;
pub use document::{Document, SchemaValidator};
pub use error::{Diagnostic, Error, Result, Severity};
pub use tree::{NodeData, NodeId, XmlTree};
pub use xpath::{NodeRef, XPathQuery};

/// Version of the fiscalxml library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// XML Schema instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XML digital signature namespace
pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
