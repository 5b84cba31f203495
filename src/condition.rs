//! State-conditional responses.
//!
//! The condition with the most `when` keys wins; among equally specific
//! conditions the first declared wins. This is the reverse of the tie-break
//! between mocks, where the last one wins.

use crate::config::{StateCondition, StateResponseDefinition, StaticResponse};
use crate::matcher::{deep_equal, lookup_state};
use serde_json::{Map, Value};

/// Whether every `when` key exists in `state` with an equal value.
pub fn condition_matches(condition: &StateCondition, state: &Map<String, Value>) -> bool {
    condition.when.iter().all(|(key, expected)| {
        lookup_state(state, key).is_some_and(|actual| deep_equal(&actual, expected))
    })
}

/// The most specific matching condition, if any.
pub fn find_matching_condition<'a>(
    conditions: &'a [StateCondition],
    state: &Map<String, Value>,
) -> Option<&'a StateCondition> {
    let mut best: Option<&StateCondition> = None;
    for condition in conditions {
        if !condition_matches(condition, state) {
            continue;
        }
        // Strictly greater keeps the earliest on ties
        if best.map_or(true, |b| condition.when.len() > b.when.len()) {
            best = Some(condition);
        }
    }
    best
}

/// Resolve a state response to the matching condition's response or the default.
pub fn resolve_state_response<'a>(
    definition: &'a StateResponseDefinition,
    state: &Map<String, Value>,
) -> &'a StaticResponse {
    find_matching_condition(&definition.conditions, state)
        .map(|condition| &condition.then)
        .unwrap_or(&definition.default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(yaml: &str) -> StateResponseDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn state(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_condition_or_default() {
        let def = definition(
            r#"
default: {body: D}
conditions:
  - when: {step: x}
    then: {body: R1}
"#,
        );
        assert_eq!(resolve_state_response(&def, &state(json!({"step": "x"}))).body, "R1");
        assert_eq!(resolve_state_response(&def, &state(json!({}))).body, "D");
        assert_eq!(resolve_state_response(&def, &state(json!({"step": "y"}))).body, "D");
    }

    #[test]
    fn test_most_when_keys_wins() {
        let def = definition(
            r#"
default: {body: D}
conditions:
  - when: {step: x}
    then: {body: one}
  - when: {step: x, tier: gold}
    then: {body: two}
"#,
        );
        let s = state(json!({"step": "x", "tier": "gold", "extra": true}));
        assert_eq!(resolve_state_response(&def, &s).body, "two");
    }

    #[test]
    fn test_first_wins_on_ties() {
        let def = definition(
            r#"
default: {body: D}
conditions:
  - when: {a: 1}
    then: {body: first}
  - when: {b: 2}
    then: {body: second}
"#,
        );
        let s = state(json!({"a": 1, "b": 2}));
        assert_eq!(resolve_state_response(&def, &s).body, "first");
    }

    #[test]
    fn test_deep_equality_for_structured_values() {
        let def = definition(
            r#"
default: {body: D}
conditions:
  - when: {cart: {items: [1, 2]}}
    then: {body: full}
"#,
        );
        assert_eq!(
            resolve_state_response(&def, &state(json!({"cart": {"items": [1, 2]}}))).body,
            "full"
        );
        assert_eq!(
            resolve_state_response(&def, &state(json!({"cart": {"items": [1]}}))).body,
            "D"
        );
    }

    #[test]
    fn test_empty_conditions_fall_through() {
        let def = definition("{default: {status: 204}}");
        assert_eq!(resolve_state_response(&def, &state(json!({"any": 1}))).status, 204);
    }

    #[test]
    fn test_empty_when_matches_anything() {
        let def = definition(
            r#"
default: {body: D}
conditions:
  - when: {}
    then: {body: always}
"#,
        );
        assert_eq!(resolve_state_response(&def, &Map::new()).body, "always");
    }
}
