//! Dotted-path parsing and safe traversal.
//!
//! Paths such as `body.user.id` or `items[]` are parsed once into a list of
//! validated segments. The keys `__proto__`, `constructor` and `prototype`
//! are rejected at every level, for reads and writes alike.

use crate::context::RequestContext;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Keys that are never read, written or merged.
pub const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns true if `key` is on the denylist.
pub fn is_forbidden_key(key: &str) -> bool {
    FORBIDDEN_KEYS.contains(&key)
}

/// Errors produced while parsing a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path {path:?} contains an empty segment")]
    EmptySegment { path: String },

    #[error("path segment {segment:?} is not allowed")]
    Forbidden { segment: String },
}

/// A parsed, denylist-checked dotted path.
///
/// A trailing `[]` on the last segment marks an append write
/// (`items[]` pushes onto `items`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DottedPath {
    segments: Vec<String>,
    append: bool,
}

impl DottedPath {
    /// Parse and validate a dotted path.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mut append = false;
        if let Some(last) = segments.last_mut() {
            if let Some(name) = last.strip_suffix("[]") {
                *last = name.to_string();
                append = true;
            }
        }

        for segment in &segments {
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: path.to_string(),
                });
            }
            if is_forbidden_key(segment) {
                return Err(PathError::Forbidden {
                    segment: segment.clone(),
                });
            }
        }

        Ok(Self { segments, append })
    }

    /// The validated segments, without the append marker.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the path ends in `[]`.
    pub fn is_append(&self) -> bool {
        self.append
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a successfully parsed path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment and the remainder.
    pub fn split_first(&self) -> Option<(&str, &[String])> {
        self.segments
            .split_first()
            .map(|(first, rest)| (first.as_str(), rest))
    }
}

impl fmt::Display for DottedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))?;
        if self.append {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Walk `segments` starting at `root`.
///
/// Objects are indexed by key, arrays by canonical decimal index, and a final
/// `length` segment on an array yields its length. Anything else is `None`.
pub fn traverse(root: &Value, segments: &[String]) -> Option<Value> {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        if is_forbidden_key(segment) {
            return None;
        }
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                if segment == "length" {
                    return (i + 1 == segments.len()).then(|| Value::from(items.len()));
                }
                let index: usize = segment.parse().ok()?;
                if index.to_string() != *segment {
                    return None;
                }
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Walk `segments` starting at an object's entries.
pub fn traverse_map(root: &Map<String, Value>, segments: &[String]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if is_forbidden_key(first) {
        return None;
    }
    traverse(root.get(first)?, rest)
}

/// Read a value from a request by dotted path.
///
/// The first segment selects `body`, `headers` or `query`; at least one more
/// segment is required. Header names are compared case-insensitively.
pub fn extract_from_path(context: &RequestContext, path: &str) -> Option<Value> {
    let path = DottedPath::parse(path).ok()?;
    if path.is_append() || path.len() < 2 {
        return None;
    }

    let (source, rest) = path.split_first()?;
    match source {
        "body" => traverse(context.body.as_ref()?, rest),
        "headers" => match rest {
            [name] => context.header(name).map(Value::from),
            _ => None,
        },
        "query" => match rest {
            [name] => context.query.get(name).cloned().map(Value::from),
            _ => None,
        },
        _ => None,
    }
}

/// Remove denylisted keys from every object nested in `value`.
pub fn strip_forbidden_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_forbidden_key(key))
                .map(|(key, value)| (key, strip_forbidden_keys(value)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_forbidden_keys).collect())
        }
        other => other,
    }
}
