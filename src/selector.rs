//! Response selection.
//!
//! Picks one mock per request, then runs the stateful steps around it:
//! sequence cursors, state conditions, capture, templating and the
//! after-response state merge.

use crate::condition::resolve_state_response;
use crate::config::{EngineSettings, MockDefinition, Producer, StaticResponse};
use crate::context::RequestContext;
use crate::matcher::evaluate;
use crate::path::extract_from_path;
use crate::sequence::{resolve_index, SequenceSlot, SequenceTracker};
use crate::state::StateStore;
use crate::template::{inject, inject_headers, inject_map, TemplateNamespace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A mock together with the URL parameters extracted for this request.
#[derive(Debug, Clone)]
pub struct MockWithParams<'a> {
    pub mock: &'a MockDefinition,
    pub params: HashMap<String, String>,
}

impl<'a> MockWithParams<'a> {
    pub fn new(mock: &'a MockDefinition) -> Self {
        Self {
            mock,
            params: HashMap::new(),
        }
    }

    pub fn with_params(mock: &'a MockDefinition, params: HashMap<String, String>) -> Self {
        Self { mock, params }
    }

    /// Identity used for sequence cursors.
    ///
    /// The registry-assigned cursor key when present, then the mock's id,
    /// otherwise derived from its position in the candidate list.
    pub fn key(&self, position: usize) -> Cow<'a, str> {
        let mock = self.mock;
        match (&mock.cursor_key, &mock.id) {
            (Some(key), _) | (None, Some(key)) => Cow::Borrowed(key.as_str()),
            (None, None) => Cow::Owned(format!("#{} {} {}", position, mock.method, mock.url)),
        }
    }
}

/// The response produced for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResponse {
    pub status: u16,
    pub body: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

/// Why no response could be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Nothing matched, or every match was an exhausted sequence
    #[error("No mock matched: {message}")]
    NoMockMatched { message: String },

    /// The selected mock cannot produce a response
    #[error("Invalid mock: {message}")]
    InvalidMock { message: String },
}

/// Discriminant of [`SelectionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionErrorKind {
    NoMockMatched,
    InvalidMock,
}

impl SelectionError {
    pub fn kind(&self) -> SelectionErrorKind {
        match self {
            SelectionError::NoMockMatched { .. } => SelectionErrorKind::NoMockMatched,
            SelectionError::InvalidMock { .. } => SelectionErrorKind::InvalidMock,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SelectionError::NoMockMatched { message } | SelectionError::InvalidMock { message } => {
                message
            }
        }
    }
}

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
    /// Requests whose selected mock could not produce a response
    pub requests_invalid: u64,
}

/// Selects and produces responses.
///
/// Owns the state store and sequence tracker; both are partitioned by test
/// id, so one selector serves many tests. Calls for the same test id must be
/// serialized by the caller.
#[derive(Debug, Default)]
pub struct ResponseSelector {
    settings: EngineSettings,
    state: StateStore,
    sequences: SequenceTracker,
    stats: SelectionStats,
}

impl ResponseSelector {
    /// Create a selector with empty stores.
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_stores(settings, StateStore::new(), SequenceTracker::new())
    }

    /// Create a selector around existing stores.
    pub fn with_stores(
        settings: EngineSettings,
        state: StateStore,
        sequences: SequenceTracker,
    ) -> Self {
        Self {
            settings,
            state,
            sequences,
            stats: SelectionStats::default(),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn sequences(&self) -> &SequenceTracker {
        &self.sequences
    }

    pub fn stats(&self) -> SelectionStats {
        self.stats
    }

    /// Clear state and sequence cursors for one test.
    pub fn reset_test(&mut self, test_id: &str) {
        self.state.reset(test_id);
        self.sequences.reset(test_id);
        debug!(test_id, "Test state reset");
    }

    /// Select a response for `context` from `candidates`.
    ///
    /// Candidates are expected as `baseline ++ active scenario`: the highest
    /// specificity wins and the last candidate wins ties. A sequence mock
    /// exhausted under `repeat: none` drops out and selection is retried
    /// among the rest. `scenario_id` is only used for diagnostics.
    pub fn select_response(
        &mut self,
        test_id: &str,
        scenario_id: &str,
        context: &RequestContext,
        candidates: &[MockWithParams<'_>],
    ) -> Result<ResolvedResponse, SelectionError> {
        self.stats.requests_total += 1;

        let state = self.state.view(test_id);
        let mut matches: Vec<(usize, u32)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(position, candidate)| {
                let outcome = evaluate(candidate.mock, context, Some(state));
                debug!(
                    test_id,
                    mock = %candidate.key(position),
                    matches = outcome.matches,
                    specificity = outcome.specificity,
                    "Evaluated mock"
                );
                outcome.matches.then_some((position, outcome.specificity))
            })
            .collect();

        loop {
            // max_by_key keeps the last maximum, so later candidates win ties
            let Some(best) = matches
                .iter()
                .enumerate()
                .max_by_key(|(_, (_, specificity))| *specificity)
                .map(|(index, _)| index)
            else {
                return Err(self.no_match(test_id, scenario_id, context));
            };

            let (position, specificity) = matches[best];
            let candidate = &candidates[position];
            let key = candidate.key(position);

            let produced = self.produce(test_id, &key, candidate.mock);
            match produced {
                Err(e) => {
                    self.stats.requests_invalid += 1;
                    warn!(test_id, scenario_id, mock = %key, error = %e, "Selected mock is invalid");
                    return Err(e);
                }
                Ok(Some(response)) => {
                    self.stats.requests_matched += 1;
                    if self.settings.log_matches {
                        info!(
                            test_id,
                            scenario_id,
                            mock = %key,
                            producer = candidate.mock.producer.kind(),
                            specificity,
                            method = %context.method,
                            url = %context.url,
                            "Request matched mock"
                        );
                    }
                    return Ok(self.finish(test_id, context, candidate, response));
                }
                Ok(None) => {
                    debug!(test_id, mock = %key, "Sequence exhausted, reselecting");
                    matches.remove(best);
                }
            }
        }
    }

    /// Resolve the producer to a response template.
    ///
    /// `None` means an exhausted sequence that sits out this round.
    fn produce<'m>(
        &mut self,
        test_id: &str,
        key: &str,
        mock: &'m MockDefinition,
    ) -> Result<Option<&'m StaticResponse>, SelectionError> {
        match &mock.producer {
            Producer::Response(response) => Ok(Some(response)),
            Producer::Sequence(sequence) => {
                if sequence.responses.is_empty() {
                    return Err(SelectionError::InvalidMock {
                        message: format!("sequence of mock {key} has no responses"),
                    });
                }
                let position = self.sequences.get_position(test_id, key);
                match resolve_index(position, sequence.responses.len(), sequence.repeat) {
                    SequenceSlot::Index(index) => {
                        self.sequences.advance(test_id, key);
                        Ok(sequence.responses.get(index))
                    }
                    SequenceSlot::Exhausted => Ok(None),
                }
            }
            Producer::StateResponse(definition) => Ok(Some(resolve_state_response(
                definition,
                self.state.view(test_id),
            ))),
        }
    }

    /// Capture, template, and apply the after-response merge.
    fn finish(
        &mut self,
        test_id: &str,
        context: &RequestContext,
        candidate: &MockWithParams<'_>,
        response: &StaticResponse,
    ) -> ResolvedResponse {
        let mock = candidate.mock;

        for rule in &mock.capture_state.rules {
            match extract_from_path(context, &rule.source) {
                Some(value) => {
                    debug!(test_id, target = %rule.target, source = %rule.source, "Capturing state");
                    self.state.set(test_id, &rule.target, value);
                }
                None => debug!(test_id, source = %rule.source, "Capture source not present"),
            }
        }

        let namespace = TemplateNamespace::new(self.state.view(test_id), &candidate.params);
        let resolved = ResolvedResponse {
            status: response.status,
            body: inject(&response.body, &namespace),
            headers: inject_headers(&response.headers, &namespace),
            delay: response.delay,
        };

        // Rendered against the state the response saw, merged afterwards
        let pending = mock
            .after_response
            .as_ref()
            .map(|after| inject_map(&after.set_state, &namespace));
        if let Some(partial) = pending {
            self.state.merge(test_id, partial);
        }

        resolved
    }

    fn no_match(
        &mut self,
        test_id: &str,
        scenario_id: &str,
        context: &RequestContext,
    ) -> SelectionError {
        self.stats.requests_unmatched += 1;
        if self.settings.log_unmatched {
            warn!(
                test_id,
                scenario_id,
                method = %context.method,
                url = %context.url,
                "No matching mock found"
            );
        }
        SelectionError::NoMockMatched {
            message: format!(
                "no mock matched {} {} (test {}, scenario {})",
                context.method, context.url, test_id, scenario_id
            ),
        }
    }
}
