//! Character encoding transcoding
//!
//! Documents are held internally as UTF-8; transcoding happens at the byte
//! boundaries. On load the declared encoding is detected and the raw bytes
//! are decoded to the internal representation. On save and canonicalize the
//! internal text is re-expressed in the document's working single-byte
//! encoding. Characters with no representation in the target encoding are
//! replaced with the encoder's standard substitution — accepted lossy
//! behavior, not an error.

use crate::error::{Error, Result};
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Default working encoding for saved documents
pub const DEFAULT_ENCODING: &str = "ISO-8859-1";

static DECL_ENCODING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)^\s*<\?xml[^>]*?encoding\s*=\s*["']([^"']+)["']"#)
        .expect("declaration encoding regex is valid")
});

static DECL_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)^\s*<\?xml[^>]*?version\s*=\s*["']([^"']+)["']"#)
        .expect("declaration version regex is valid")
});

/// Extract the encoding label from an XML declaration, if one is present.
pub fn declared_encoding(data: &[u8]) -> Option<String> {
    DECL_ENCODING_RE
        .captures(data)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Extract the version from an XML declaration, if one is present.
pub fn declared_version(data: &[u8]) -> Option<String> {
    DECL_VERSION_RE
        .captures(data)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

fn resolve(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Error::Encoding(format!("unknown encoding label: {}", label)))
}

/// Decode raw document bytes in the given encoding to internal UTF-8 text.
///
/// Undecodable byte sequences are replaced rather than rejected; structural
/// problems surface later as parse diagnostics.
pub fn decode_bytes(data: &[u8], label: &str) -> Result<String> {
    let encoding = resolve(label)?;
    let (text, _, _) = encoding.decode(data);
    Ok(text.into_owned())
}

/// Encode internal UTF-8 text into the given target encoding.
///
/// Unmappable characters use the encoder's standard substitution (a numeric
/// character reference), which keeps the output well-formed in the target
/// encoding.
pub fn encode_string(text: &str, label: &str) -> Result<Vec<u8>> {
    let encoding = resolve(label)?;
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_encoding_utf8() {
        let data = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><a/>";
        assert_eq!(declared_encoding(data).as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_declared_encoding_single_quotes() {
        let data = b"<?xml version='1.0' encoding='ISO-8859-1'?><a/>";
        assert_eq!(declared_encoding(data).as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_declared_encoding_absent() {
        assert_eq!(declared_encoding(b"<a/>"), None);
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><a/>"), None);
    }

    #[test]
    fn test_declared_version() {
        let data = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><a/>";
        assert_eq!(declared_version(data).as_deref(), Some("1.0"));
    }

    #[test]
    fn test_decode_latin1_bytes() {
        // 0xF1 is n-tilde in ISO-8859-1
        let data = b"se\xf1al";
        assert_eq!(decode_bytes(data, "ISO-8859-1").unwrap(), "señal");
    }

    #[test]
    fn test_encode_to_latin1() {
        let bytes = encode_string("señal", "ISO-8859-1").unwrap();
        assert_eq!(bytes, b"se\xf1al");
    }

    #[test]
    fn test_encode_unmappable_substitutes() {
        let bytes = encode_string("a\u{4e2d}b", "ISO-8859-1").unwrap();
        // the encoder substitutes a numeric character reference
        assert_eq!(bytes, b"a&#20013;b");
    }

    #[test]
    fn test_unknown_label_rejected() {
        assert!(decode_bytes(b"x", "no-such-encoding").is_err());
    }

    #[test]
    fn test_utf8_round_trip() {
        let bytes = encode_string("plain ascii", "UTF-8").unwrap();
        assert_eq!(decode_bytes(&bytes, "UTF-8").unwrap(), "plain ascii");
    }
}
