//! Mock engine: scenarios plus selection in one handle.

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::registry::{RegistryError, ScenarioRegistry};
use crate::selector::{
    MockWithParams, ResolvedResponse, ResponseSelector, SelectionError, SelectionStats,
};
use crate::state::StateStore;
use std::collections::HashMap;
use tracing::info;

/// Mock Engine
///
/// Resolves requests against the scenarios configured for each test.
/// Construct once and pass to every request handler.
#[derive(Debug)]
pub struct MockEngine {
    registry: ScenarioRegistry,
    selector: ResponseSelector,
}

impl MockEngine {
    /// Create an engine from validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, RegistryError> {
        let registry = ScenarioRegistry::from_config(&config)?;

        info!(
            scenarios = config.scenarios.len(),
            mocks = config.mock_count(),
            default_scenario = %config.settings.default_scenario,
            "Mock engine initialized"
        );

        Ok(Self {
            registry,
            selector: ResponseSelector::new(config.settings),
        })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config = EngineConfig::from_yaml(yaml)?;
        Ok(Self::new(config)?)
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn state(&self) -> &StateStore {
        self.selector.state()
    }

    pub fn stats(&self) -> SelectionStats {
        self.selector.stats()
    }

    /// Switch `test_id` to `scenario_id`, clearing its state and sequences.
    pub fn activate_scenario(&mut self, test_id: &str, scenario_id: &str) -> Result<(), RegistryError> {
        self.registry.activate(test_id, scenario_id)?;
        self.selector.reset_test(test_id);
        Ok(())
    }

    /// Return `test_id` to the default scenario, clearing its state and sequences.
    pub fn reset_test(&mut self, test_id: &str) {
        self.registry.deactivate(test_id);
        self.selector.reset_test(test_id);
    }

    /// Resolve a request without URL parameters.
    pub fn resolve(
        &mut self,
        test_id: &str,
        context: &RequestContext,
    ) -> Result<ResolvedResponse, SelectionError> {
        self.resolve_with_params(test_id, context, &HashMap::new())
    }

    /// Resolve a request, handing `params` to every candidate's templates.
    pub fn resolve_with_params(
        &mut self,
        test_id: &str,
        context: &RequestContext,
        params: &HashMap<String, String>,
    ) -> Result<ResolvedResponse, SelectionError> {
        let active = self
            .registry
            .candidates(test_id)
            .map_err(|e| SelectionError::NoMockMatched {
                message: e.to_string(),
            })?;
        let candidates: Vec<_> = active
            .mocks
            .iter()
            .map(|mock| MockWithParams::with_params(mock, params.clone()))
            .collect();

        self.selector
            .select_response(test_id, active.scenario_id, context, &candidates)
    }
}
