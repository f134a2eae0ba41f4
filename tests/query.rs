//! XPath query layer against realistic fiscal documents

use fiscalxml::xpath::NamespaceMap;
use fiscalxml::{Document, Error, XPathQuery};
use pretty_assertions::assert_eq;
use serde_json::json;

const INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:example:invoice">
    <Header folio="77" stamp="2020-06-01">
        <Issuer>Comercial Norte</Issuer>
    </Header>
    <Line>
        <Description>Widget</Description>
        <Amount>100</Amount>
    </Line>
    <Line>
        <Description>Gadget</Description>
        <Amount>250</Amount>
    </Line>
    <Total>350</Total>
</Invoice>"#;

#[test]
fn unprefixed_queries_match_namespaced_document() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    assert_eq!(
        query.get_value("/Invoice/Total", &[], None).unwrap().as_deref(),
        Some("350")
    );
}

#[test]
fn registered_namespaces_enable_qualified_matching() {
    let mut ns = NamespaceMap::new();
    ns.insert("inv".to_string(), "urn:example:invoice".to_string());
    let query = XPathQuery::parse_with_namespaces(INVOICE, ns).unwrap();
    assert_eq!(
        query.get_values("/inv:Invoice/inv:Total", &[], None).unwrap(),
        ["350"]
    );
}

#[test]
fn projection_aggregates_duplicate_lines() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    let projected = query.get("/Invoice", &[], None).unwrap();
    assert_eq!(
        projected["Line"],
        json!([
            {"Description": "Widget", "Amount": "100"},
            {"Description": "Gadget", "Amount": "250"}
        ])
    );
    // single occurrence stays a mapping, not a one-element list
    assert_eq!(projected["Total"], json!("350"));
}

#[test]
fn parameterized_query_with_plain_value() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    assert_eq!(
        query
            .get_values("/Invoice/Line[Description=:d]/Amount", &[("d", "Gadget")], None)
            .unwrap(),
        ["250"]
    );
}

#[test]
fn parameterized_query_with_both_quote_kinds() {
    let xml = r#"<r><entry>O'Brien "The Builder"</entry><entry>other</entry></r>"#;
    let query = XPathQuery::parse(xml).unwrap();
    let needle = r#"O'Brien "The Builder""#;
    assert_eq!(
        query.get_values("/r/entry[.=:name]", &[("name", needle)], None).unwrap(),
        [needle]
    );
}

#[test]
fn attribute_queries() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    assert_eq!(
        query.get_value("/Invoice/Header/@folio", &[], None).unwrap().as_deref(),
        Some("77")
    );
}

#[test]
fn context_relative_queries() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    let lines = query.get_nodes("/Invoice/Line", &[], None).unwrap();
    assert_eq!(lines.len(), 2);
    let second = lines[1].as_element().unwrap();
    assert_eq!(
        query.get_values("Amount", &[], Some(second)).unwrap(),
        ["250"]
    );
}

#[test]
fn zero_one_many_projection_shapes() {
    let query = XPathQuery::parse(INVOICE).unwrap();
    assert_eq!(query.get("/Invoice/Missing", &[], None).unwrap(), json!(null));
    assert_eq!(query.get("/Invoice/Total", &[], None).unwrap(), json!("350"));
    assert_eq!(
        query.get("/Invoice/Line/Amount", &[], None).unwrap(),
        json!(["100", "250"])
    );
}

#[test]
fn invalid_queries_are_rejected_not_misanswered() {
    let query = XPathQuery::parse("<r/>").unwrap();
    for bad in ["", "/r//", "/r/a[", "/r/a[nonsense(@)]"] {
        assert!(
            matches!(query.get_nodes(bad, &[], None), Err(Error::InvalidXPath(_))),
            "query {:?} should be rejected",
            bad
        );
    }
}

#[test]
fn document_query_surface_matches_engine() {
    let doc = Document::from_bytes(INVOICE.as_bytes()).unwrap();
    assert_eq!(
        doc.query_value("/Invoice/Header/Issuer", &[]).unwrap().as_deref(),
        Some("Comercial Norte")
    );
    assert_eq!(doc.get("Invoice.Line.1.Amount"), Some(&json!("250")));
}
