//! Configuration for the mock engine.
//!
//! Defines scenarios, mocks, match criteria, and response producers.

use crate::matcher::{UrlPattern, ValueMatcher};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::warn;

/// Main configuration for the mock engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Global settings
    #[serde(default)]
    pub settings: EngineSettings,

    /// Scenario definitions; the default scenario holds the baseline mocks
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
}

impl EngineConfig {
    /// Load configuration from a YAML (or JSON) file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.id.as_str()) {
                anyhow::bail!("Duplicate scenario id: {}", scenario.id);
            }
            scenario.validate()?;
        }
        if !self.scenarios.is_empty() && !seen.contains(self.settings.default_scenario.as_str()) {
            anyhow::bail!(
                "Default scenario '{}' is not defined",
                self.settings.default_scenario
            );
        }
        Ok(())
    }

    /// Total number of mocks across all scenarios.
    pub fn mock_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.mocks.len()).sum()
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Scenario whose mocks form the baseline for every test
    #[serde(default = "default_scenario_id")]
    pub default_scenario: String,

    /// Log selected mocks
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests no mock matched
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_scenario: default_scenario_id(),
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_scenario_id() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// A named collection of mocks active together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    /// Unique identifier for this scenario
    pub id: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Mocks in declaration order
    #[serde(default)]
    pub mocks: Vec<MockDefinition>,
}

impl ScenarioDefinition {
    /// Validate the scenario and its mocks.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Scenario id cannot be empty");
        }
        let mut ids = HashSet::new();
        for (i, mock) in self.mocks.iter().enumerate() {
            mock.validate()
                .map_err(|e| anyhow::anyhow!("Scenario {}, mock {}: {}", self.id, i, e))?;
            if let Some(id) = &mock.id {
                if !ids.insert(id.as_str()) {
                    anyhow::bail!("Scenario {}, mock {}: duplicate mock id '{}'", self.id, i, id);
                }
            }
        }
        Ok(())
    }
}

/// A single mock: request gate, optional criteria, and one producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawMockDefinition", into = "RawMockDefinition")]
pub struct MockDefinition {
    /// Declared identity, used in logs and as a cursor key fallback
    pub id: Option<String>,

    /// Scenario-qualified sequence cursor key, assigned on registration
    pub cursor_key: Option<String>,

    /// HTTP method (case-insensitive)
    pub method: String,

    /// URL pattern
    pub url: UrlPattern,

    /// Match criteria; `None` makes this a fallback mock
    pub criteria: Option<MatchCriteria>,

    /// Request values copied into state before the response is produced
    pub capture_state: CaptureState,

    /// State mutation applied after the response is produced
    pub after_response: Option<AfterResponse>,

    /// How the response is produced
    pub producer: Producer,
}

impl MockDefinition {
    /// Create a fallback mock with the given producer.
    pub fn new(method: impl Into<String>, url: impl Into<UrlPattern>, producer: Producer) -> Self {
        Self {
            id: None,
            cursor_key: None,
            method: method.into(),
            url: url.into(),
            criteria: None,
            capture_state: CaptureState::default(),
            after_response: None,
            producer,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_criteria(mut self, criteria: MatchCriteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_capture(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.capture_state.rules.push(CaptureRule {
            target: target.into(),
            source: source.into(),
        });
        self
    }

    pub fn with_after_response(mut self, set_state: Map<String, Value>) -> Self {
        self.after_response = Some(AfterResponse { set_state });
        self
    }

    /// Validate the mock definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.method.is_empty() {
            anyhow::bail!("Mock method cannot be empty");
        }
        self.producer.validate()
    }

    /// Whether this mock has no match criteria.
    pub fn is_fallback(&self) -> bool {
        self.criteria.is_none()
    }
}

/// Serialized form of [`MockDefinition`]; producers are separate optional keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMockDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    method: String,
    url: UrlPattern,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    criteria: Option<MatchCriteria>,
    #[serde(default, skip_serializing_if = "CaptureState::is_empty")]
    capture_state: CaptureState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after_response: Option<AfterResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<StaticResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<SequenceDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_response: Option<StateResponseDefinition>,
}

impl TryFrom<RawMockDefinition> for MockDefinition {
    type Error = String;

    fn try_from(raw: RawMockDefinition) -> Result<Self, Self::Error> {
        let producer = match (raw.response, raw.sequence, raw.state_response) {
            (Some(response), None, None) => Producer::Response(response),
            (None, Some(sequence), None) => Producer::Sequence(sequence),
            (None, None, Some(state_response)) => Producer::StateResponse(state_response),
            (None, None, None) => {
                return Err(format!(
                    "mock {} {} declares none of response, sequence, state_response",
                    raw.method, raw.url
                ))
            }
            _ => {
                return Err(format!(
                    "mock {} {} declares more than one of response, sequence, state_response",
                    raw.method, raw.url
                ))
            }
        };

        Ok(Self {
            id: raw.id,
            cursor_key: None,
            method: raw.method,
            url: raw.url,
            criteria: raw.criteria,
            capture_state: raw.capture_state,
            after_response: raw.after_response,
            producer,
        })
    }
}

impl From<MockDefinition> for RawMockDefinition {
    fn from(mock: MockDefinition) -> Self {
        let (response, sequence, state_response) = match mock.producer {
            Producer::Response(r) => (Some(r), None, None),
            Producer::Sequence(s) => (None, Some(s), None),
            Producer::StateResponse(s) => (None, None, Some(s)),
        };
        Self {
            id: mock.id,
            method: mock.method,
            url: mock.url,
            criteria: mock.criteria,
            capture_state: mock.capture_state,
            after_response: mock.after_response,
            response,
            sequence,
            state_response,
        }
    }
}

/// The single way a mock produces its response.
#[derive(Debug, Clone)]
pub enum Producer {
    /// A fixed response
    Response(StaticResponse),
    /// Ordered responses, one per selection
    Sequence(SequenceDefinition),
    /// Response chosen by current state
    StateResponse(StateResponseDefinition),
}

impl Producer {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Producer::Response(_) => "response",
            Producer::Sequence(_) => "sequence",
            Producer::StateResponse(_) => "state_response",
        }
    }

    /// Validate the producer.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Producer::Response(response) => response.validate(),
            Producer::Sequence(sequence) => {
                if sequence.responses.is_empty() {
                    anyhow::bail!("Sequence must declare at least one response");
                }
                sequence.responses.iter().try_for_each(StaticResponse::validate)
            }
            Producer::StateResponse(state_response) => {
                state_response.default.validate()?;
                state_response
                    .conditions
                    .iter()
                    .try_for_each(|c| c.then.validate())
            }
        }
    }
}

/// Match criteria. Every declared field must be satisfied.
///
/// Loaded through a plain JSON value: a block with an unknown key or a
/// wrongly shaped field is kept as declared and never matches, so one bad
/// mock cannot take down the scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct MatchCriteria {
    /// Partial body match by top-level key
    pub body: Option<BTreeMap<String, ValueMatcher>>,

    /// Header match (names case-insensitive)
    pub headers: BTreeMap<String, ValueMatcher>,

    /// Query parameter match
    pub query: BTreeMap<String, ValueMatcher>,

    /// Per-test state match by dotted key
    pub state: Map<String, Value>,

    /// Additional URL constraint
    pub url: Option<UrlPattern>,

    /// The declared block when it could not be understood
    pub malformed: Option<Value>,
}

impl MatchCriteria {
    /// Number of compared fields across body, headers, query, state and URL.
    pub fn field_count(&self) -> u32 {
        let count = self.body.as_ref().map_or(0, BTreeMap::len)
            + self.headers.len()
            + self.query.len()
            + self.state.len()
            + usize::from(self.url.is_some());
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Whether the block was malformed and can never match.
    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }
}

/// Serialized form of a well-formed [`MatchCriteria`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<BTreeMap<String, ValueMatcher>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, ValueMatcher>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    query: BTreeMap<String, ValueMatcher>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<UrlPattern>,
}

impl From<Value> for MatchCriteria {
    fn from(declared: Value) -> Self {
        match serde_json::from_value::<RawMatchCriteria>(declared.clone()) {
            Ok(raw) => Self {
                body: raw.body,
                headers: raw.headers,
                query: raw.query,
                state: raw.state,
                url: raw.url,
                malformed: None,
            },
            Err(e) => {
                warn!(criteria = %declared, error = %e, "Malformed match criteria, mock will never match");
                Self {
                    malformed: Some(declared),
                    ..Self::default()
                }
            }
        }
    }
}

impl From<MatchCriteria> for Value {
    fn from(criteria: MatchCriteria) -> Self {
        if let Some(declared) = criteria.malformed {
            return declared;
        }
        let raw = RawMatchCriteria {
            body: criteria.body,
            headers: criteria.headers,
            query: criteria.query,
            state: criteria.state,
            url: criteria.url,
        };
        serde_json::to_value(raw).unwrap_or_default()
    }
}

/// A fixed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticResponse {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response body
    #[serde(default)]
    pub body: Value,

    /// Response headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Advisory delay in milliseconds, enacted by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl Default for StaticResponse {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: Value::Null,
            headers: HashMap::new(),
            delay: None,
        }
    }
}

impl StaticResponse {
    /// A 200 response with a JSON body.
    pub fn json(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        Ok(())
    }
}

/// Ordered responses advanced one step per selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceDefinition {
    pub responses: Vec<StaticResponse>,

    /// Behaviour once every response has been served
    #[serde(default)]
    pub repeat: RepeatMode,
}

/// Exhaustion policy for a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Keep serving the final response
    #[default]
    Last,
    /// Wrap around to the first response
    Cycle,
    /// Stop matching once exhausted
    None,
}

/// Response chosen by matching conditions against per-test state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateResponseDefinition {
    pub default: StaticResponse,

    #[serde(default)]
    pub conditions: Vec<StateCondition>,
}

/// A `when` clause and the response it selects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateCondition {
    pub when: Map<String, Value>,
    pub then: StaticResponse,
}

/// State mutation applied once the response has been produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AfterResponse {
    /// Values (templated) shallow-merged into state
    #[serde(default)]
    pub set_state: Map<String, Value>,
}

/// Ordered `target: source` capture rules.
///
/// Declared as a map from state path (`name[]` appends) to request path
/// (`body.x`, `headers.y`, `query.z`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CaptureState {
    pub rules: Vec<CaptureRule>,
}

/// Copy the request value at `source` into state at `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRule {
    pub target: String,
    pub source: String,
}

impl CaptureState {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TryFrom<Map<String, Value>> for CaptureState {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let rules = map
            .into_iter()
            .map(|(target, source)| match source {
                Value::String(source) => Ok(CaptureRule { target, source }),
                other => Err(format!(
                    "capture_state source for '{target}' must be a string path, got {other}"
                )),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }
}

impl From<CaptureState> for Map<String, Value> {
    fn from(capture: CaptureState) -> Self {
        capture
            .rules
            .into_iter()
            .map(|rule| (rule.target, Value::String(rule.source)))
            .collect()
    }
}
