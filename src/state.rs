//! Per-test key/value state.
//!
//! Every operation is scoped to a test id; partitions are created on the
//! first write and dropped on reset. Paths use [`DottedPath`] semantics, so
//! denylisted segments turn writes into no-ops and reads into `None`.

use crate::path::{is_forbidden_key, strip_forbidden_keys, traverse_map, DottedPath};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// In-memory state partitioned by test id.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    partitions: HashMap<String, Map<String, Value>>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at a dotted path.
    ///
    /// Intermediate segments are created as objects, replacing any non-object
    /// value in the way. A path ending in `name[]` appends to the array at
    /// `name`, replacing a non-array value with a fresh array first.
    pub fn set(&mut self, test_id: &str, path: &str, value: Value) {
        match DottedPath::parse(path) {
            Ok(path) => self.set_path(test_id, &path, value),
            Err(e) => debug!(test_id, path, error = %e, "Ignoring state write"),
        }
    }

    /// Write `value` at an already parsed path.
    pub fn set_path(&mut self, test_id: &str, path: &DottedPath, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let value = strip_forbidden_keys(value);

        let mut current = self.partitions.entry(test_id.to_string()).or_default();
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                return;
            };
            current = next;
        }

        if path.is_append() {
            match current.entry(last.clone()).or_insert(Value::Null) {
                Value::Array(items) => items.push(value),
                other => *other = Value::Array(vec![value]),
            }
        } else {
            current.insert(last.clone(), value);
        }
    }

    /// Read the value at a dotted path.
    ///
    /// Returns `None` for missing, non-traversable or denylisted segments.
    /// A final `length` segment on an array yields its length.
    pub fn get(&self, test_id: &str, path: &str) -> Option<Value> {
        let path = DottedPath::parse(path).ok()?;
        if path.is_append() {
            return None;
        }
        traverse_map(self.partitions.get(test_id)?, path.segments())
    }

    /// Snapshot of the whole partition (`{}` if absent).
    pub fn get_all(&self, test_id: &str) -> Map<String, Value> {
        self.partitions.get(test_id).cloned().unwrap_or_default()
    }

    /// Borrowed view of a partition, empty if absent.
    pub(crate) fn view(&self, test_id: &str) -> &Map<String, Value> {
        static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();
        self.partitions
            .get(test_id)
            .unwrap_or_else(|| EMPTY.get_or_init(Map::new))
    }

    /// Shallow-merge top-level keys into the partition, skipping denylisted keys.
    pub fn merge(&mut self, test_id: &str, partial: Map<String, Value>) {
        let mut entries = partial
            .into_iter()
            .filter(|(key, _)| {
                let allowed = !is_forbidden_key(key);
                if !allowed {
                    debug!(test_id, key = %key, "Ignoring denylisted merge key");
                }
                allowed
            })
            .peekable();
        if entries.peek().is_none() {
            return;
        }

        let state = self.partitions.entry(test_id.to_string()).or_default();
        for (key, value) in entries {
            state.insert(key, strip_forbidden_keys(value));
        }
    }

    /// Drop the partition for `test_id`.
    pub fn reset(&mut self, test_id: &str) {
        self.partitions.remove(test_id);
    }

    /// Whether a partition exists for `test_id`.
    pub fn contains(&self, test_id: &str) -> bool {
        self.partitions.contains_key(test_id)
    }

    /// Number of live partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}
