//! End-to-end resolution through the public API.

use serde_json::{json, Value};
use std::collections::HashMap;
use zentinel_mock_engine::selector::SelectionErrorKind;
use zentinel_mock_engine::{MockDefinition, MockEngine, MockWithParams, RequestContext, ResponseSelector};

fn mocks(yaml: &str) -> Vec<MockDefinition> {
    serde_yaml::from_str(yaml).unwrap()
}

fn bodies(selector: &mut ResponseSelector, mocks: &[MockDefinition], context: &RequestContext, n: usize) -> Vec<Value> {
    let candidates: Vec<_> = mocks.iter().map(MockWithParams::new).collect();
    (0..n)
        .map(|_| {
            selector
                .select_response("t", "default", context, &candidates)
                .unwrap()
                .body
        })
        .collect()
}

#[test]
fn test_header_match_overrides_fallback() {
    let mocks = mocks(
        r#"
- {method: GET, url: /p, response: {body: {tier: standard}}}
- {method: GET, url: /p, match: {headers: {x-tier: premium}}, response: {body: {tier: premium}}}
"#,
    );
    let mut selector = ResponseSelector::default();

    let premium = RequestContext::new("GET", "/p").with_header("X-Tier", "premium");
    assert_eq!(bodies(&mut selector, &mocks, &premium, 1), [json!({"tier": "premium"})]);

    let plain = RequestContext::new("GET", "/p");
    assert_eq!(bodies(&mut selector, &mocks, &plain, 1), [json!({"tier": "standard"})]);

    // Header values are case-sensitive
    let shouting = RequestContext::new("GET", "/p").with_header("x-tier", "PREMIUM");
    assert_eq!(bodies(&mut selector, &mocks, &shouting, 1), [json!({"tier": "standard"})]);
}

#[test]
fn test_capture_appends_in_order() {
    let mocks = mocks(r#"[{method: POST, url: /cart, capture_state: {"items[]": body.productId}, response: {status: 201}}]"#);
    let candidates: Vec<_> = mocks.iter().map(MockWithParams::new).collect();
    let mut selector = ResponseSelector::default();

    for product_id in [1, 2, 1] {
        let context = RequestContext::new("POST", "/cart").with_body(json!({"productId": product_id}));
        let response = selector
            .select_response("t", "default", &context, &candidates)
            .unwrap();
        assert_eq!(response.status, 201);
    }
    assert_eq!(selector.state().get("t", "items"), Some(json!([1, 2, 1])));
    assert_eq!(selector.state().get("t", "items.length"), Some(json!(3)));
}

#[test]
fn test_sequence_repeat_last() {
    let mocks = mocks("[{method: GET, url: /s, sequence: {repeat: last, responses: [{body: A}, {body: B}, {body: C}]}}]");
    let mut selector = ResponseSelector::default();
    let got = bodies(&mut selector, &mocks, &RequestContext::new("GET", "/s"), 5);
    assert_eq!(got, ["A", "B", "C", "C", "C"]);
}

#[test]
fn test_sequence_repeat_cycle() {
    let mocks = mocks("[{method: GET, url: /s, sequence: {repeat: cycle, responses: [{body: A}, {body: B}]}}]");
    let mut selector = ResponseSelector::default();
    let got = bodies(&mut selector, &mocks, &RequestContext::new("GET", "/s"), 4);
    assert_eq!(got, ["A", "B", "A", "B"]);
}

#[test]
fn test_state_response_follows_state() {
    let mocks = mocks(
        r#"
- method: GET
  url: /status
  state_response:
    default: {body: D}
    conditions:
      - when: {step: x}
        then: {body: R1}
"#,
    );
    let candidates: Vec<_> = mocks.iter().map(MockWithParams::new).collect();
    let mut selector = ResponseSelector::default();
    let context = RequestContext::new("GET", "/status");

    let empty = selector.select_response("t", "s", &context, &candidates).unwrap();
    assert_eq!(empty.body, "D");

    let mut state = zentinel_mock_engine::state::StateStore::new();
    state.set("t", "step", json!("x"));
    let mut selector = ResponseSelector::with_stores(
        Default::default(),
        state,
        zentinel_mock_engine::sequence::SequenceTracker::new(),
    );
    let stepped = selector.select_response("t", "s", &context, &candidates).unwrap();
    assert_eq!(stepped.body, "R1");
}

#[test]
fn test_equal_fallbacks_pick_the_last() {
    let mocks = mocks(
        r#"
- {method: GET, url: /p, response: {body: first}}
- {method: GET, url: /p, response: {body: second}}
"#,
    );
    let mut selector = ResponseSelector::default();
    assert_eq!(bodies(&mut selector, &mocks, &RequestContext::new("GET", "/p"), 1), ["second"]);
}

#[test]
fn test_malformed_criteria_fail_closed() {
    let mocks = mocks(
        r#"
- {method: GET, url: /p, response: {body: fallback}}
- {method: GET, url: /p, match: {headers: {x-a: {fuzzy: a}}}, response: {body: fuzzy}}
- {method: GET, url: /p, match: {query: {q: {regex: "("}}}, response: {body: broken-regex}}
"#,
    );
    let mut selector = ResponseSelector::default();
    let context = RequestContext::new("GET", "/p?q=(").with_header("x-a", "a");
    assert_eq!(bodies(&mut selector, &mocks, &context, 1), ["fallback"]);
}

#[test]
fn test_malformed_match_blocks_fall_back() {
    let yaml = r#"
scenarios:
  - id: default
    mocks:
      - {method: GET, url: /p, response: {body: fallback}}
      - {method: GET, url: /p, match: {headers: x-tier}, response: {body: string-headers}}
      - {method: GET, url: /p, match: {body: [1]}, response: {body: array-body}}
      - {method: GET, url: /p, match: {cookies: {session: abc}}, response: {body: unknown-key}}
"#;
    let mut engine = MockEngine::from_yaml(yaml).unwrap();
    let context = RequestContext::new("GET", "/p")
        .with_header("x-tier", "premium")
        .with_body(json!([1]));
    assert_eq!(engine.resolve("t", &context).unwrap().body, "fallback");
}

#[test]
fn test_shared_mock_id_keeps_separate_cursors() {
    let yaml = r#"
scenarios:
  - id: default
    mocks:
      - id: poll
        method: GET
        url: /poll
        match: {query: {v: "1"}}
        sequence: {responses: [{body: A}, {body: B}]}
  - id: other
    mocks:
      - id: poll
        method: GET
        url: /poll
        sequence: {responses: [{body: X}, {body: Y}, {body: Z}]}
"#;
    let mut engine = MockEngine::from_yaml(yaml).unwrap();
    engine.activate_scenario("t", "other").unwrap();

    let fallback = RequestContext::new("GET", "/poll");
    let baseline = RequestContext::new("GET", "/poll?v=1");
    assert_eq!(engine.resolve("t", &fallback).unwrap().body, "X");
    assert_eq!(engine.resolve("t", &baseline).unwrap().body, "A");
    assert_eq!(engine.resolve("t", &fallback).unwrap().body, "Y");
    assert_eq!(engine.resolve("t", &baseline).unwrap().body, "B");
}

#[test]
fn test_sample_scenarios_end_to_end() {
    let mut engine = MockEngine::from_yaml(include_str!("../demos/default-scenarios.yaml")).unwrap();

    // Capture and template
    let add = RequestContext::new("POST", "/api/cart")
        .with_body(json!({"productId": "sku-1"}))
        .with_header("x-user", "ada");
    let response = engine.resolve("t1", &add).unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, json!({"items": ["sku-1"], "count": 1}));
    assert_eq!(response.headers["x-last-user"], "ada");

    // Params supplied by the caller
    let params = HashMap::from([("id".to_string(), "7".to_string())]);
    let user = engine
        .resolve_with_params("t1", &RequestContext::new("GET", "/api/users/7"), &params)
        .unwrap();
    assert_eq!(user.body["id"], "7");

    // Polling sequence keyed by registry id
    let poll = RequestContext::new("GET", "/api/jobs/42");
    let statuses: Vec<_> = (0..4)
        .map(|_| engine.resolve("t1", &poll).unwrap().body["status"].clone())
        .collect();
    assert_eq!(statuses, ["pending", "pending", "done", "done"]);

    // Checkout flow: after_response sees pre-mutation state
    let checkout = RequestContext::new("GET", "/api/checkout");
    assert_eq!(engine.resolve("t1", &checkout).unwrap().body["step"], "cart");
    let pay = RequestContext::new("POST", "/api/checkout").with_body(json!({"method": "card"}));
    assert_eq!(engine.resolve("t1", &pay).unwrap().status, 202);
    assert_eq!(engine.state().get("t1", "previousStep"), Some(json!("{{state.step}}")));
    assert_eq!(engine.resolve("t1", &checkout).unwrap().body["step"], "paid");

    // Another test is untouched
    assert_eq!(engine.resolve("t2", &checkout).unwrap().body["step"], "cart");
    let bad_pay = RequestContext::new("POST", "/api/checkout").with_body(json!({"method": "cash"}));
    assert_eq!(
        engine.resolve("t2", &bad_pay).unwrap_err().kind(),
        SelectionErrorKind::NoMockMatched
    );
}

#[test]
fn test_rate_limit_scenario() {
    let mut engine = MockEngine::from_yaml(include_str!("../demos/default-scenarios.yaml")).unwrap();
    let search = RequestContext::new("GET", "/api/search?q=shoes");

    assert_eq!(
        engine.resolve("t", &search).unwrap_err().kind(),
        SelectionErrorKind::NoMockMatched
    );

    engine.activate_scenario("t", "rate-limited").unwrap();
    let statuses: Vec<_> = (0..4).map(|_| engine.resolve("t", &search).unwrap().status).collect();
    assert_eq!(statuses, [200, 200, 429, 429]);

    // Re-activating rewinds the quota
    engine.activate_scenario("t", "rate-limited").unwrap();
    assert_eq!(engine.resolve("t", &search).unwrap().status, 200);
}

#[test]
fn test_outage_scenario_overrides_fallback_only() {
    let mut engine = MockEngine::from_yaml(include_str!("../demos/default-scenarios.yaml")).unwrap();
    engine.activate_scenario("t", "outage").unwrap();

    let plain = engine.resolve("t", &RequestContext::new("GET", "/api/products")).unwrap();
    assert_eq!(plain.status, 503);
    assert_eq!(plain.delay, Some(1500));

    let premium = RequestContext::new("GET", "/api/products").with_header("x-tier", "premium");
    assert_eq!(engine.resolve("t", &premium).unwrap().body["tier"], "premium");

    let stats = engine.stats();
    assert_eq!(stats.requests_total, 2);
    assert_eq!(stats.requests_matched, 2);
}
