//! Placeholder substitution for responses.
//!
//! A string that is exactly `{{state.path}}` or `{{params.name}}` is replaced
//! by the looked-up value, keeping its JSON type. Unresolved placeholders are
//! left as written; a `null` value substitutes `null`. Placeholders embedded
//! in longer strings are not expanded.

use crate::path::{traverse, traverse_map, DottedPath};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Values visible to templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateNamespace<'a> {
    state: &'a Map<String, Value>,
    params: &'a HashMap<String, String>,
}

impl<'a> TemplateNamespace<'a> {
    pub fn new(state: &'a Map<String, Value>, params: &'a HashMap<String, String>) -> Self {
        Self { state, params }
    }

    /// Look up `namespace.path`.
    pub fn lookup(&self, expression: &str) -> Option<Value> {
        let path = DottedPath::parse(expression).ok()?;
        if path.is_append() {
            return None;
        }
        let (namespace, rest) = path.split_first()?;
        if rest.is_empty() {
            return None;
        }

        match namespace {
            "params" => {
                let (name, tail) = rest.split_first()?;
                let value = Value::String(self.params.get(name)?.clone());
                traverse(&value, tail)
            }
            "state" => traverse_map(self.state, rest),
            _ => None,
        }
    }
}

/// The expression inside a whole-string placeholder.
fn placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.is_empty() && !inner.contains(['{', '}'])).then_some(inner)
}

/// Substitute placeholders throughout a JSON tree.
pub fn inject(value: &Value, namespace: &TemplateNamespace<'_>) -> Value {
    match value {
        Value::String(s) => placeholder(s)
            .and_then(|expression| namespace.lookup(expression))
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| inject(v, namespace)).collect()),
        Value::Object(map) => Value::Object(inject_map(map, namespace)),
        _ => value.clone(),
    }
}

/// Substitute placeholders in every value of an object.
pub fn inject_map(map: &Map<String, Value>, namespace: &TemplateNamespace<'_>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), inject(v, namespace)))
        .collect()
}

/// Substitute placeholders in header values.
///
/// Non-string values are rendered as JSON text.
pub fn inject_headers(
    headers: &HashMap<String, String>,
    namespace: &TemplateNamespace<'_>,
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let rendered = placeholder(value)
                .and_then(|expression| namespace.lookup(expression))
                .map(|resolved| match resolved {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| value.clone());
            (name.clone(), rendered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures() -> (Map<String, Value>, HashMap<String, String>) {
        let state = json!({
            "user": {"name": "Ada", "tags": ["a", "b"]},
            "count": 3,
            "cleared": null
        })
        .as_object()
        .cloned()
        .unwrap();
        let params = HashMap::from([("id".to_string(), "42".to_string())]);
        (state, params)
    }

    #[test]
    fn test_inject_preserves_types() {
        let (state, params) = fixtures();
        let ns = TemplateNamespace::new(&state, &params);

        let body = json!({
            "id": "{{params.id}}",
            "name": "{{state.user.name}}",
            "count": "{{state.count}}",
            "tags": "{{state.user.tags}}",
            "tagCount": "{{state.user.tags.length}}",
            "nested": [{"who": "{{state.user.name}}"}],
            "static": "no template",
            "number": 7
        });

        assert_eq!(
            inject(&body, &ns),
            json!({
                "id": "42",
                "name": "Ada",
                "count": 3,
                "tags": ["a", "b"],
                "tagCount": 2,
                "nested": [{"who": "Ada"}],
                "static": "no template",
                "number": 7
            })
        );
    }

    #[test]
    fn test_unresolved_placeholder_is_preserved() {
        let (state, params) = fixtures();
        let ns = TemplateNamespace::new(&state, &params);

        assert_eq!(inject(&json!("{{state.missing}}"), &ns), json!("{{state.missing}}"));
        assert_eq!(inject(&json!("{{params.nope}}"), &ns), json!("{{params.nope}}"));
        assert_eq!(inject(&json!("{{other.x}}"), &ns), json!("{{other.x}}"));
        assert_eq!(inject(&json!("{{state}}"), &ns), json!("{{state}}"));
        assert_eq!(inject(&json!("{{state.__proto__}}"), &ns), json!("{{state.__proto__}}"));
    }

    #[test]
    fn test_null_is_substituted() {
        let (state, params) = fixtures();
        let ns = TemplateNamespace::new(&state, &params);
        assert_eq!(inject(&json!({"v": "{{state.cleared}}"}), &ns), json!({"v": null}));
    }

    #[test]
    fn test_embedded_placeholders_are_not_expanded() {
        let (state, params) = fixtures();
        let ns = TemplateNamespace::new(&state, &params);

        let embedded = json!("Hello {{state.user.name}}");
        assert_eq!(inject(&embedded, &ns), embedded);

        let two = json!("{{state.count}}{{state.count}}");
        assert_eq!(inject(&two, &ns), two);
    }

    #[test]
    fn test_inject_headers() {
        let (state, params) = fixtures();
        let ns = TemplateNamespace::new(&state, &params);
        let headers = HashMap::from([
            ("x-user".to_string(), "{{state.user.name}}".to_string()),
            ("x-count".to_string(), "{{state.count}}".to_string()),
            ("x-missing".to_string(), "{{state.nope}}".to_string()),
        ]);

        let rendered = inject_headers(&headers, &ns);
        assert_eq!(rendered["x-user"], "Ada");
        assert_eq!(rendered["x-count"], "3");
        assert_eq!(rendered["x-missing"], "{{state.nope}}");
    }
}
