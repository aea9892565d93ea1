//! Request and trailer metadata, normalized the way the protocol expects.
//!
//! Inbound header names become lowercase underscore form (`X-Foo-Bar` →
//! `x_foo_bar`); keys ending in `_bin` carry base64-encoded binary values and
//! are decoded on the way in. Iteration order is key-sorted.

use std::collections::BTreeMap;

use base64::Engine as _;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::util::base64::STANDARD;

/// One metadata value: a plain string, or decoded bytes for `*_bin` keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    Ascii(String),
    Binary(Bytes),
}

impl MetadataValue {
    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            MetadataValue::Ascii(s) => Some(s),
            MetadataValue::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Ascii(_) => None,
            MetadataValue::Binary(b) => Some(b),
        }
    }

    /// Wire rendering: ascii verbatim, binary re-encoded as base64.
    pub(crate) fn render(&self) -> String {
        match self {
            MetadataValue::Ascii(s) => s.clone(),
            MetadataValue::Binary(b) => STANDARD.encode(b),
        }
    }
}

/// A sorted map of normalized metadata keys to values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }

    /// Extract metadata from inbound request headers.
    ///
    /// Every header is taken except `accept` and the entity headers
    /// (`content-type`, `content-length`), which in CGI-style transports
    /// never carry the request-header prefix. Later values win for repeated
    /// names.
    pub fn from_headers(headers: &HeaderMap) -> Metadata {
        let mut metadata = Metadata::new();

        for (name, value) in headers {
            if *name == ACCEPT || *name == CONTENT_TYPE || *name == CONTENT_LENGTH {
                continue;
            }

            let value = match value.to_str() {
                Ok(v) => v,
                Err(_) => {
                    debug!(header = %name, "skipping non-ascii metadata value");
                    continue;
                }
            };

            metadata.insert_normalized(&normalize_key(name.as_str()), value);
        }

        metadata
    }

    fn insert_normalized(&mut self, key: &str, value: &str) {
        if key.ends_with("_bin") {
            match STANDARD.decode(value) {
                Ok(decoded) => {
                    self.entries
                        .insert(key.to_owned(), MetadataValue::Binary(Bytes::from(decoded)));
                    return;
                }
                Err(err) => {
                    debug!(key, %err, "binary metadata value is not valid base64");
                }
            }
        }

        self.entries
            .insert(key.to_owned(), MetadataValue::Ascii(value.to_owned()));
    }

    pub fn insert_ascii(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            normalize_key(&key.into()),
            MetadataValue::Ascii(value.into()),
        );
    }

    pub fn insert_binary(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.insert(
            normalize_key(&key.into()),
            MetadataValue::Binary(value.into()),
        );
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(&normalize_key(key))
    }

    /// Iterate pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render these pairs as outbound HTTP headers, for the client executor.
    /// Keys go back to hyphen form; binary values are base64-encoded.
    pub(crate) fn append_to_headers(&self, headers: &mut HeaderMap) {
        for (key, value) in self.iter() {
            let name = key.replace('_', "-");
            let name = match HeaderName::try_from(name.as_str()) {
                Ok(n) => n,
                Err(err) => {
                    debug!(key, %err, "metadata key is not a legal header name");
                    continue;
                }
            };

            match HeaderValue::try_from(value.render()) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(err) => {
                    debug!(key, %err, "metadata value is not a legal header value");
                }
            }
        }
    }
}

/// Lowercase underscore form of a header or metadata name.
pub(crate) fn normalize_key(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_extraction_normalizes_names() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Foo-Bar", "baz".parse().unwrap());
        headers.insert("authorization", "Bearer t".parse().unwrap());

        let metadata = Metadata::from_headers(&headers);

        assert_eq!(
            metadata.get("x_foo_bar"),
            Some(&MetadataValue::Ascii("baz".to_owned()))
        );
        assert_eq!(
            metadata.get("authorization"),
            Some(&MetadataValue::Ascii("Bearer t".to_owned()))
        );
    }

    #[test]
    fn bin_suffix_is_base64_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Foo-Bin", "aGVsbG8=".parse().unwrap());

        let metadata = Metadata::from_headers(&headers);

        assert_eq!(
            metadata.get("x_foo_bin"),
            Some(&MetadataValue::Binary(Bytes::from_static(b"hello")))
        );
    }

    #[test]
    fn malformed_bin_value_stays_ascii() {
        let mut headers = HeaderMap::new();
        headers.insert("x-foo-bin", "%%%".parse().unwrap());

        let metadata = Metadata::from_headers(&headers);

        assert_eq!(
            metadata.get("x_foo_bin"),
            Some(&MetadataValue::Ascii("%%%".to_owned()))
        );
    }

    #[test]
    fn negotiation_headers_are_excluded() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, "application/grpc-web+proto".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/grpc-web+proto".parse().unwrap());
        headers.insert(CONTENT_LENGTH, "5".parse().unwrap());
        headers.insert("x-keep", "yes".parse().unwrap());

        let metadata = Metadata::from_headers(&headers);

        assert_eq!(metadata.len(), 1);
        assert!(metadata.get("x_keep").is_some());
    }

    #[test]
    fn iteration_is_key_sorted() {
        let mut metadata = Metadata::new();
        metadata.insert_ascii("zulu", "1");
        metadata.insert_ascii("alpha", "2");
        metadata.insert_ascii("mike", "3");

        let keys: Vec<&str> = metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha", "mike", "zulu"]);
    }

    #[test]
    fn outbound_headers_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert_ascii("x-trace-id", "abc");
        metadata.insert_binary("x-token-bin", &b"hello"[..]);

        let mut headers = HeaderMap::new();
        metadata.append_to_headers(&mut headers);

        assert_eq!(headers.get("x-trace-id").unwrap(), "abc");
        assert_eq!(headers.get("x-token-bin").unwrap(), "aGVsbG8=");
        assert_eq!(Metadata::from_headers(&headers), metadata);
    }
}
