//! Request matching logic.
//!
//! Decides whether a mock applies to a request and scores how specific the
//! match is. Criteria are compiled once when a mock is loaded; criteria that
//! cannot be compiled never match.

use crate::config::{MatchCriteria, MockDefinition, Producer};
use crate::context::{request_path, strip_query, RequestContext};
use crate::path::{is_forbidden_key, traverse_map, DottedPath};
use globset::GlobMatcher;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Base score for any mock that declares match criteria.
pub const CRITERIA_BASE_SPECIFICITY: u32 = 100;

/// Score of a fallback mock that produces sequences or state responses.
pub const STATEFUL_FALLBACK_SPECIFICITY: u32 = 1;

/// Score of a plain fallback mock.
pub const FALLBACK_SPECIFICITY: u32 = 0;

/// Result of evaluating one mock against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matches: bool,
    pub specificity: u32,
}

impl MatchOutcome {
    const NO_MATCH: Self = Self {
        matches: false,
        specificity: 0,
    };

    fn matched(specificity: u32) -> Self {
        Self {
            matches: true,
            specificity,
        }
    }
}

/// Evaluate `mock` against a request.
///
/// The method and URL pattern gate the mock without contributing to its
/// score. Mocks with criteria score 100 plus one per compared field; fallback
/// mocks score 1 for sequence/state producers and 0 otherwise. `state` is
/// `None` when no state store is available, in which case state criteria
/// never match.
pub fn evaluate(
    mock: &MockDefinition,
    context: &RequestContext,
    state: Option<&Map<String, Value>>,
) -> MatchOutcome {
    if !mock.method.eq_ignore_ascii_case(&context.method) || !mock.url.matches(context) {
        return MatchOutcome::NO_MATCH;
    }

    match &mock.criteria {
        None => MatchOutcome::matched(fallback_specificity(&mock.producer)),
        Some(criteria) if matches_criteria(criteria, context, state) => {
            MatchOutcome::matched(CRITERIA_BASE_SPECIFICITY + criteria.field_count())
        }
        Some(_) => MatchOutcome::NO_MATCH,
    }
}

fn fallback_specificity(producer: &Producer) -> u32 {
    match producer {
        Producer::Response(_) => FALLBACK_SPECIFICITY,
        Producer::Sequence(_) | Producer::StateResponse(_) => STATEFUL_FALLBACK_SPECIFICITY,
    }
}

fn matches_criteria(
    criteria: &MatchCriteria,
    context: &RequestContext,
    state: Option<&Map<String, Value>>,
) -> bool {
    if criteria.is_malformed() {
        return false;
    }

    if let Some(body) = &criteria.body {
        if !matches_body(body, context.body.as_ref()) {
            return false;
        }
    }

    if !criteria
        .headers
        .iter()
        .all(|(name, matcher)| matches_header(context, name, matcher))
    {
        return false;
    }

    if !criteria
        .query
        .iter()
        .all(|(name, matcher)| matcher.matches_str(context.query.get(name).map(String::as_str)))
    {
        return false;
    }

    if !criteria.state.is_empty() {
        let Some(state) = state else {
            return false;
        };
        if !matches_state(&criteria.state, state) {
            return false;
        }
    }

    criteria.url.as_ref().map_or(true, |url| url.matches(context))
}

fn matches_header(context: &RequestContext, name: &str, matcher: &ValueMatcher) -> bool {
    // Header names compare lower-cased, values as-is
    matcher.matches_str(context.header(name))
}

/// Partial body match: every declared key must be present and satisfied.
fn matches_body(expected: &BTreeMap<String, ValueMatcher>, body: Option<&Value>) -> bool {
    let Some(Value::Object(body)) = body else {
        return false;
    };
    expected.iter().all(|(key, matcher)| {
        !is_forbidden_key(key) && matcher.matches_value(body.get(key))
    })
}

fn matches_state(expected: &Map<String, Value>, state: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, value)| {
        lookup_state(state, key).is_some_and(|actual| deep_equal(&actual, value))
    })
}

/// Dotted lookup into a state snapshot.
pub(crate) fn lookup_state(state: &Map<String, Value>, key: &str) -> Option<Value> {
    let path = DottedPath::parse(key).ok()?;
    if path.is_append() {
        return None;
    }
    traverse_map(state, path.segments())
}

/// Structural equality with numeric comparison by value (`1 == 1.0`).
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// String form used by the string strategies.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A compiled expectation for a single header, query or body field.
///
/// Declared as a plain value (equality), a single-key strategy object
/// (`contains`, `startsWith`, `endsWith`, `equals`) or a regex
/// (`{regex: {source, flags}}`). The declared form is kept for
/// serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct ValueMatcher {
    source: Value,
    rule: MatchRule,
}

#[derive(Debug, Clone)]
enum MatchRule {
    Literal(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Equals(String),
    Regex(Regex),
    Unsupported,
}

impl ValueMatcher {
    /// The matcher as declared.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Match a string-valued field (headers, query).
    ///
    /// Literal numbers and booleans compare by their string form.
    pub fn matches_str(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match &self.rule {
            MatchRule::Literal(Value::String(expected)) => expected == actual,
            MatchRule::Literal(expected @ (Value::Number(_) | Value::Bool(_))) => {
                expected.to_string() == actual
            }
            MatchRule::Literal(_) => false,
            rule => matches_strategy(rule, actual),
        }
    }

    /// Match a JSON-valued field (body).
    ///
    /// Literals compare structurally; strategies stringify the field first.
    pub fn matches_value(&self, actual: Option<&Value>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match &self.rule {
            MatchRule::Literal(expected) => deep_equal(expected, actual),
            rule => matches_strategy(rule, &stringify(actual)),
        }
    }
}

fn matches_strategy(rule: &MatchRule, actual: &str) -> bool {
    match rule {
        MatchRule::Contains(needle) => actual.contains(needle.as_str()),
        MatchRule::StartsWith(prefix) => actual.starts_with(prefix.as_str()),
        MatchRule::EndsWith(suffix) => actual.ends_with(suffix.as_str()),
        MatchRule::Equals(expected) => actual == expected,
        MatchRule::Regex(regex) => regex.is_match(actual),
        MatchRule::Literal(_) | MatchRule::Unsupported => false,
    }
}

impl From<Value> for ValueMatcher {
    fn from(source: Value) -> Self {
        let rule = match &source {
            Value::Object(map) if map.len() == 1 => match map.iter().next() {
                Some((key, operand)) => match key.as_str() {
                    "contains" => MatchRule::Contains(stringify(operand)),
                    "startsWith" => MatchRule::StartsWith(stringify(operand)),
                    "endsWith" => MatchRule::EndsWith(stringify(operand)),
                    "equals" => MatchRule::Equals(stringify(operand)),
                    "regex" => compile_regex_operand(operand)
                        .map(MatchRule::Regex)
                        .unwrap_or(MatchRule::Unsupported),
                    _ => MatchRule::Literal(source.clone()),
                },
                None => MatchRule::Literal(source.clone()),
            },
            _ => MatchRule::Literal(source.clone()),
        };
        Self { source, rule }
    }
}

impl From<ValueMatcher> for Value {
    fn from(matcher: ValueMatcher) -> Self {
        matcher.source
    }
}

/// Compile `{source, flags}` or a bare source string.
fn compile_regex_operand(operand: &Value) -> Option<Regex> {
    match operand {
        Value::String(source) => compile_regex(source, ""),
        Value::Object(spec) => {
            let source = spec.get("source")?.as_str()?;
            let flags = spec.get("flags").and_then(Value::as_str).unwrap_or("");
            compile_regex(source, flags)
        }
        _ => None,
    }
}

/// Compile a regex with JavaScript-style flags.
///
/// `i`, `m` and `s` map onto the regex options; `g`, `y` and `u` have no
/// effect on a single test. Any other flag rejects the pattern.
pub fn compile_regex(source: &str, flags: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'y' | 'u' => {}
            other => {
                warn!(pattern = source, flag = %other, "Unsupported regex flag");
                return None;
            }
        }
    }
    builder
        .build()
        .map_err(|e| warn!(pattern = source, error = %e, "Invalid regex"))
        .ok()
}

/// A URL pattern: literal, path template, glob or regex.
///
/// Strings containing `*` are globs; strings with a `:name` or `{name}`
/// segment are templates; other strings match exactly. Patterns starting
/// with a scheme compare against the full URL without query string,
/// otherwise against the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct UrlPattern {
    source: Value,
    kind: UrlKind,
}

#[derive(Debug, Clone)]
enum UrlKind {
    Exact(String),
    Template(Vec<String>, bool),
    Glob(GlobMatcher, bool),
    Regex(Regex),
    Unsupported,
}

impl UrlPattern {
    /// Whether the request URL satisfies this pattern.
    ///
    /// Templates are checked structurally only; parameter values are
    /// extracted by the caller.
    pub fn matches(&self, context: &RequestContext) -> bool {
        match &self.kind {
            UrlKind::Exact(pattern) => {
                pattern == &context.url || pattern == url_target(&context.url, is_absolute(pattern))
            }
            UrlKind::Template(segments, absolute) => {
                let target = url_target(&context.url, *absolute);
                let actual: Vec<&str> = target.split('/').collect();
                actual.len() == segments.len()
                    && segments.iter().zip(&actual).all(|(expected, actual)| {
                        if is_param_segment(expected) {
                            !actual.is_empty()
                        } else {
                            expected == actual
                        }
                    })
            }
            UrlKind::Glob(glob, absolute) => glob.is_match(url_target(&context.url, *absolute)),
            UrlKind::Regex(regex) => regex.is_match(&context.url),
            UrlKind::Unsupported => false,
        }
    }

    /// The pattern as declared.
    pub fn source(&self) -> &Value {
        &self.source
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Value::String(s) => f.write_str(s),
            Value::Object(map) => match map.get("regex") {
                Some(Value::Object(spec)) => write!(
                    f,
                    "/{}/{}",
                    spec.get("source").and_then(Value::as_str).unwrap_or(""),
                    spec.get("flags").and_then(Value::as_str).unwrap_or("")
                ),
                Some(Value::String(source)) => write!(f, "/{source}/"),
                _ => write!(f, "{}", self.source),
            },
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for UrlPattern {
    fn from(pattern: &str) -> Self {
        Value::from(pattern).into()
    }
}

impl From<Value> for UrlPattern {
    fn from(source: Value) -> Self {
        let kind = match &source {
            Value::String(pattern) => compile_url(pattern),
            Value::Object(map) if map.len() == 1 => map
                .get("regex")
                .and_then(compile_regex_operand)
                .map(UrlKind::Regex)
                .unwrap_or(UrlKind::Unsupported),
            _ => UrlKind::Unsupported,
        };
        if matches!(kind, UrlKind::Unsupported) {
            warn!(pattern = %source, "Unsupported URL pattern, it will never match");
        }
        Self { source, kind }
    }
}

impl From<UrlPattern> for Value {
    fn from(pattern: UrlPattern) -> Self {
        pattern.source
    }
}

fn compile_url(pattern: &str) -> UrlKind {
    let absolute = is_absolute(pattern);
    if pattern.contains('*') {
        return match globset::Glob::new(pattern) {
            Ok(glob) => UrlKind::Glob(glob.compile_matcher(), absolute),
            Err(e) => {
                warn!(pattern, error = %e, "Invalid glob");
                UrlKind::Unsupported
            }
        };
    }

    let segments: Vec<String> = pattern.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| is_param_segment(s)) {
        UrlKind::Template(segments, absolute)
    } else {
        UrlKind::Exact(pattern.to_string())
    }
}

fn is_param_segment(segment: &str) -> bool {
    (segment.len() > 1 && segment.starts_with(':'))
        || (segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}'))
}

fn is_absolute(pattern: &str) -> bool {
    pattern.contains("://")
}

fn url_target(url: &str, absolute: bool) -> &str {
    if absolute {
        strip_query(url)
    } else {
        request_path(url)
    }
}
