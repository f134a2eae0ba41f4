//! Signature-grade text normalization
//!
//! Scalar values inserted into a document pass through [`sanitize`], which
//! strips control characters and resolves pre-escaped entities so the engine
//! serializes each value exactly once. Serialized output passes through
//! [`fix_entities`], which restores the quote escaping inside text content
//! that the engine's serializer leaves literal, as required for strict
//! XML-DSIG byte compatibility.

use once_cell::sync::Lazy;
use regex::Regex;

/// Numeric literals are inserted verbatim
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric literal regex is valid")
});

/// Predefined XML entities in named and numeric form
const PREDEFINED_ENTITIES: [(&str, char); 10] = [
    ("&amp;", '&'),
    ("&#38;", '&'),
    ("&lt;", '<'),
    ("&#60;", '<'),
    ("&gt;", '>'),
    ("&#62;", '>'),
    ("&quot;", '"'),
    ("&#34;", '"'),
    ("&apos;", '\''),
    ("&#39;", '\''),
];

fn is_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}')
}

/// Sanitize a scalar value before insertion into a document.
///
/// Empty and purely numeric input is returned unchanged. Otherwise ASCII
/// control characters (0x00-0x1F and 0x7F) are stripped — they have no
/// canonical form and break signature verification — and the five predefined
/// entities (named or numeric) are resolved to their literal characters, so
/// a caller handing in pre-escaped text does not get double-escaped output.
/// The engine's serializer escapes `&`, `<` and `>` on write; quotes are
/// handled by [`fix_entities`] after serialization.
pub fn sanitize(value: &str) -> String {
    if value.is_empty() || NUMERIC_RE.is_match(value) {
        return value.to_string();
    }

    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    'scan: while let Some(c) = rest.chars().next() {
        if c == '&' {
            for (entity, literal) in PREDEFINED_ENTITIES {
                if rest.starts_with(entity) {
                    result.push(literal);
                    rest = &rest[entity.len()..];
                    continue 'scan;
                }
            }
        }
        if !is_control(c) {
            result.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    result
}

/// Restore quote escaping inside text content of a serialized XML string.
///
/// The scan tracks whether the current position is inside element text
/// content (`>` enters, `<` exits) and, inside tags, whether it is inside an
/// attribute-value literal (`=` immediately followed by a quote, closed by
/// the matching quote). Literal `'` and `"` inside text content become
/// `&apos;` and `&quot;`; tag interiors and attribute values pass through
/// unchanged. Unterminated input is fixed up as far as it was scanned.
pub fn fix_entities(xml: &str) -> String {
    let mut result = String::with_capacity(xml.len());
    let mut in_text = false;
    let mut attr_quote: Option<char> = None;
    let mut prev = '\0';

    for c in xml.chars() {
        if let Some(quote) = attr_quote {
            result.push(c);
            if c == quote {
                attr_quote = None;
            }
        } else if in_text {
            match c {
                '<' => {
                    in_text = false;
                    result.push(c);
                }
                '\'' => result.push_str("&apos;"),
                '"' => result.push_str("&quot;"),
                _ => result.push(c),
            }
        } else {
            match c {
                '>' => {
                    in_text = true;
                    result.push(c);
                }
                '\'' | '"' if prev == '=' => {
                    attr_quote = Some(c);
                    result.push(c);
                }
                _ => result.push(c),
            }
        }
        prev = c;
    }
    result
}
