//! Normalized description of an inbound request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An HTTP-shaped request as seen by the engine.
///
/// Built once per request by the transport layer and never mutated during
/// resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestContext {
    /// Request method
    pub method: String,

    /// Request URL, absolute or path-only
    pub url: String,

    /// Parsed JSON body, if any
    #[serde(default)]
    pub body: Option<Value>,

    /// Request headers (single value per name)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Query parameters
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl RequestContext {
    /// Create a request context. Query parameters embedded in `url` are parsed.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let query = url
            .split_once('?')
            .map(|(_, rest)| parse_query_string(rest.split('#').next().unwrap_or("")))
            .unwrap_or_default();

        Self {
            method: method.into(),
            url,
            body: None,
            headers: HashMap::new(),
            query,
        }
    }

    /// Build a context from raw transport parts.
    ///
    /// Multi-valued headers keep their first value. A body that is not valid
    /// JSON is kept as a JSON string; an empty body becomes `None`.
    pub fn from_raw(
        method: &str,
        url: &str,
        headers: &HashMap<String, Vec<String>>,
        body: Option<&[u8]>,
    ) -> Self {
        let mut context = Self::new(method, url);
        context.headers = flatten_headers(headers);
        context.body = body.filter(|b| !b.is_empty()).map(|b| {
            serde_json::from_slice(b)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(b).into_owned()))
        });
        context
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }

    /// The URL without scheme, authority, query string or fragment.
    pub fn path(&self) -> &str {
        request_path(&self.url)
    }
}

/// Strip scheme and authority, query string and fragment from a URL.
pub(crate) fn request_path(url: &str) -> &str {
    let without_query = strip_query(url);
    match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => without_query,
    }
}

/// Strip query string and fragment from a URL.
pub(crate) fn strip_query(url: &str) -> &str {
    url.find(['?', '#']).map(|i| &url[..i]).unwrap_or(url)
}

/// Flatten multi-valued headers to a single-value map.
fn flatten_headers(headers: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
        .collect()
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Percent-decoding with `+` as space.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
