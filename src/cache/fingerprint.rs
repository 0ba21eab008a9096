//! Deterministic cache keys
//!
//! A [`Fingerprint`] is the identity of a cached query: a namespace followed by
//! the dimensions that select the result. The notes list uses
//! `("notes", search, page)`. Server-side prefetch and client-side rendering
//! must derive the same fingerprint from the same request, so both go through
//! [`Fingerprint::notes`], [`normalize_search`] and [`normalize_page`].

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace shared by every notes list query
pub const NOTES_NAMESPACE: &str = "notes";

/// One dimension of a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Text(String),
    Number(i64),
}

impl KeyPart {
    fn write_json(&self, out: &mut String) {
        match self {
            KeyPart::Text(s) => out.push_str(&serde_json::Value::String(s.clone()).to_string()),
            KeyPart::Number(n) => out.push_str(&n.to_string()),
        }
    }
}

/// Immutable cache key: `(namespace, dimensions...)`
///
/// Equality is order- and value-sensitive. The stable string form is the
/// JSON array `["namespace", dim0, dim1, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    namespace: String,
    dimensions: Vec<KeyPart>,
}

impl Fingerprint {
    /// Start building a fingerprint in `namespace`
    pub fn builder(namespace: impl Into<String>) -> FingerprintBuilder {
        FingerprintBuilder::new(namespace)
    }

    /// Fingerprint of a notes list page
    pub fn notes(search: Option<&str>, page: u32) -> Self {
        Self::list(NOTES_NAMESPACE, search, page)
    }

    /// Fingerprint of a searchable, paginated list in `namespace`
    pub fn list(namespace: &str, search: Option<&str>, page: u32) -> Self {
        FingerprintBuilder::new(namespace)
            .optional_text(search)
            .number(i64::from(page.max(1)))
            .build()
    }

    /// Fingerprint of a notes list page from raw request values
    pub fn notes_from_raw(search: Option<&str>, raw_page: Option<&str>) -> Self {
        Self::notes(search, normalize_page(raw_page))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dimensions(&self) -> &[KeyPart] {
        &self.dimensions
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }

    /// Stable string used as the storage key
    pub fn stable_key(&self) -> String {
        let mut out = String::from("[");
        KeyPart::Text(self.namespace.clone()).write_json(&mut out);
        for part in &self.dimensions {
            out.push(',');
            part.write_json(&mut out);
        }
        out.push(']');
        out
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stable_key())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.dimensions.len() + 1))?;
        seq.serialize_element(&self.namespace)?;
        for part in &self.dimensions {
            seq.serialize_element(part)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut parts = Vec::<KeyPart>::deserialize(deserializer)?.into_iter();
        match parts.next() {
            Some(KeyPart::Text(namespace)) => Ok(Fingerprint {
                namespace,
                dimensions: parts.collect(),
            }),
            _ => Err(de::Error::custom("fingerprint must start with a namespace string")),
        }
    }
}

/// Builder for fingerprints
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    namespace: String,
    dimensions: Vec<KeyPart>,
}

impl FingerprintBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            dimensions: Vec::new(),
        }
    }

    /// Add a text dimension
    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.dimensions.push(KeyPart::Text(value.into()));
        self
    }

    /// Add a text dimension where "not specified" equals the empty string
    pub fn optional_text(self, value: Option<&str>) -> Self {
        self.text(normalize_search(value))
    }

    /// Add a numeric dimension
    pub fn number(mut self, value: i64) -> Self {
        self.dimensions.push(KeyPart::Number(value));
        self
    }

    pub fn build(self) -> Fingerprint {
        Fingerprint {
            namespace: self.namespace,
            dimensions: self.dimensions,
        }
    }
}

/// Map an absent search to the empty string
pub fn normalize_search(search: Option<&str>) -> String {
    search.unwrap_or_default().to_string()
}

/// Coerce a raw page parameter to a page number
///
/// Anything that is not an integer `>= 1` becomes `1`.
pub fn normalize_page(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(coerce_page)
        .unwrap_or(1)
}

/// Clamp a numeric page to `1..=u32::MAX`
pub fn coerce_page(page: i64) -> u32 {
    if page < 1 {
        1
    } else {
        u32::try_from(page).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_fingerprint_is_deterministic() {
        let a = Fingerprint::notes(Some("foo"), 2);
        let b = Fingerprint::notes(Some("foo"), 2);
        assert_eq!(a, b);
        assert_eq!(a.stable_key(), b.stable_key());
        assert_eq!(a.stable_key(), r#"["notes","foo",2]"#);
    }

    #[test]
    fn test_empty_and_absent_search_are_equal() {
        assert_eq!(Fingerprint::notes(Some(""), 1), Fingerprint::notes(None, 1));
        assert_eq!(Fingerprint::notes(None, 3).stable_key(), r#"["notes","",3]"#);
    }

    #[test]
    fn test_order_and_value_sensitive() {
        let a = Fingerprint::builder("notes").text("x").number(1).build();
        let b = Fingerprint::builder("notes").number(1).text("x").build();
        assert_ne!(a, b);
        assert_ne!(Fingerprint::notes(Some("x"), 1), Fingerprint::notes(Some("x"), 2));
        assert_ne!(Fingerprint::notes(Some("x"), 1), Fingerprint::notes(Some("X"), 1));
    }

    #[test]
    fn test_page_coercion() {
        assert_eq!(normalize_page(None), 1);
        assert_eq!(normalize_page(Some("")), 1);
        assert_eq!(normalize_page(Some("abc")), 1);
        assert_eq!(normalize_page(Some("0")), 1);
        assert_eq!(normalize_page(Some("-4")), 1);
        assert_eq!(normalize_page(Some("2.5")), 1);
        assert_eq!(normalize_page(Some(" 7 ")), 7);
        assert_eq!(normalize_page(Some("99999999999")), u32::MAX);
        assert_eq!(Fingerprint::notes(None, 0), Fingerprint::notes(None, 1));
    }

    #[test]
    fn test_notes_from_raw_matches_typed() {
        assert_eq!(
            Fingerprint::notes_from_raw(Some("foo"), Some("2")),
            Fingerprint::notes(Some("foo"), 2)
        );
        assert_eq!(
            Fingerprint::notes_from_raw(None, Some("nope")),
            Fingerprint::notes(Some(""), 1)
        );
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let fp = Fingerprint::notes(Some("say \"hi\""), 1);
        assert_eq!(fp.stable_key(), r#"["notes","say \"hi\"",1]"#);
    }

    #[test]
    fn test_serde_matches_stable_key() {
        let fp = Fingerprint::notes(Some("a,b"), 4);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, fp.stable_key());

        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(back.in_namespace(NOTES_NAMESPACE));

        assert!(serde_json::from_str::<Fingerprint>("[1, 2]").is_err());
    }
}
