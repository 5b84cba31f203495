//! Scenario registry.
//!
//! Holds scenario definitions and the active scenario per test, and builds
//! the ordered candidate list (`default ++ active`) for each request.

use crate::config::{EngineConfig, MockDefinition, ScenarioDefinition};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from scenario registration and activation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Unknown scenario: {id}")]
    UnknownScenario { id: String },

    #[error("Scenario already registered: {id}")]
    DuplicateScenario { id: String },

    #[error("Default scenario '{id}' is not registered")]
    MissingDefaultScenario { id: String },
}

/// The mocks to consider for one request, in selection order.
#[derive(Debug)]
pub struct ActiveMocks<'a> {
    /// Scenario active for the test
    pub scenario_id: &'a str,
    /// Default scenario mocks followed by the active scenario's mocks
    pub mocks: Vec<&'a MockDefinition>,
}

/// Registered scenarios and per-test activations.
#[derive(Debug)]
pub struct ScenarioRegistry {
    default_scenario: String,
    scenarios: HashMap<String, ScenarioDefinition>,
    active: HashMap<String, String>,
}

impl ScenarioRegistry {
    /// Create an empty registry.
    pub fn new(default_scenario: impl Into<String>) -> Self {
        Self {
            default_scenario: default_scenario.into(),
            scenarios: HashMap::new(),
            active: HashMap::new(),
        }
    }

    /// Build a registry from configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new(config.settings.default_scenario.clone());
        for scenario in &config.scenarios {
            registry.register(scenario.clone())?;
        }
        if !registry.scenarios.contains_key(&registry.default_scenario) {
            return Err(RegistryError::MissingDefaultScenario {
                id: registry.default_scenario,
            });
        }
        Ok(registry)
    }

    /// Register a scenario.
    ///
    /// Every mock gets a cursor key qualified by the scenario: `{scenario}:{id}`
    /// for mocks with an id, `{scenario}#{index}` otherwise. Mocks sharing an id
    /// across scenarios therefore never share a sequence cursor.
    pub fn register(&mut self, mut scenario: ScenarioDefinition) -> Result<(), RegistryError> {
        if self.scenarios.contains_key(&scenario.id) {
            return Err(RegistryError::DuplicateScenario { id: scenario.id });
        }
        for (index, mock) in scenario.mocks.iter_mut().enumerate() {
            let key = match &mock.id {
                Some(id) => format!("{}:{}", scenario.id, id),
                None => format!("{}#{}", scenario.id, index),
            };
            mock.cursor_key = Some(key);
        }
        debug!(scenario_id = %scenario.id, mocks = scenario.mocks.len(), "Registered scenario");
        self.scenarios.insert(scenario.id.clone(), scenario);
        Ok(())
    }

    /// Make `scenario_id` the active scenario for `test_id`.
    pub fn activate(&mut self, test_id: &str, scenario_id: &str) -> Result<(), RegistryError> {
        if !self.scenarios.contains_key(scenario_id) {
            return Err(RegistryError::UnknownScenario {
                id: scenario_id.to_string(),
            });
        }
        info!(test_id, scenario_id, "Scenario activated");
        self.active.insert(test_id.to_string(), scenario_id.to_string());
        Ok(())
    }

    /// Return `test_id` to the default scenario.
    pub fn deactivate(&mut self, test_id: &str) {
        self.active.remove(test_id);
    }

    /// Scenario active for `test_id`.
    pub fn active_scenario(&self, test_id: &str) -> &str {
        self.active
            .get(test_id)
            .map(String::as_str)
            .unwrap_or(&self.default_scenario)
    }

    pub fn default_scenario(&self) -> &str {
        &self.default_scenario
    }

    pub fn scenario(&self, id: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.get(id)
    }

    /// Registered scenario ids, sorted.
    pub fn scenario_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.scenarios.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Candidate mocks for `test_id`: default mocks, then the active scenario's.
    pub fn candidates(&self, test_id: &str) -> Result<ActiveMocks<'_>, RegistryError> {
        let default =
            self.scenarios
                .get(&self.default_scenario)
                .ok_or_else(|| RegistryError::MissingDefaultScenario {
                    id: self.default_scenario.clone(),
                })?;
        let scenario_id = self.active_scenario(test_id);

        let mut mocks: Vec<&MockDefinition> = default.mocks.iter().collect();
        if scenario_id != self.default_scenario {
            let active =
                self.scenarios
                    .get(scenario_id)
                    .ok_or_else(|| RegistryError::UnknownScenario {
                        id: scenario_id.to_string(),
                    })?;
            mocks.extend(active.mocks.iter());
        }

        Ok(ActiveMocks { scenario_id, mocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::from_yaml(
            r#"
scenarios:
  - id: default
    mocks:
      - {method: GET, url: /a, response: {body: base-a}}
      - {id: base-b, method: GET, url: /b, response: {body: base-b}}
  - id: premium
    mocks:
      - {method: GET, url: /a, response: {body: premium-a}}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_candidates_default_only() {
        let registry = ScenarioRegistry::from_config(&config()).unwrap();
        let active = registry.candidates("t1").unwrap();
        assert_eq!(active.scenario_id, "default");
        let keys: Vec<_> = active.mocks.iter().map(|m| m.cursor_key.as_deref().unwrap()).collect();
        assert_eq!(keys, ["default#0", "default:base-b"]);
        assert_eq!(active.mocks[1].id.as_deref(), Some("base-b"));
    }

    #[test]
    fn test_candidates_append_active_scenario() {
        let mut registry = ScenarioRegistry::from_config(&config()).unwrap();
        registry.activate("t1", "premium").unwrap();

        let active = registry.candidates("t1").unwrap();
        assert_eq!(active.scenario_id, "premium");
        let keys: Vec<_> = active.mocks.iter().map(|m| m.cursor_key.as_deref().unwrap()).collect();
        assert_eq!(keys, ["default#0", "default:base-b", "premium#0"]);

        assert_eq!(registry.candidates("t2").unwrap().mocks.len(), 2);

        registry.deactivate("t1");
        assert_eq!(registry.active_scenario("t1"), "default");
    }

    #[test]
    fn test_activate_unknown_scenario() {
        let mut registry = ScenarioRegistry::from_config(&config()).unwrap();
        assert_eq!(
            registry.activate("t1", "missing"),
            Err(RegistryError::UnknownScenario {
                id: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ScenarioRegistry::from_config(&config()).unwrap();
        let err = registry.register(config().scenarios.remove(1)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateScenario {
                id: "premium".to_string()
            }
        );
    }

    #[test]
    fn test_missing_default_scenario() {
        let registry = ScenarioRegistry::new("default");
        assert!(matches!(
            registry.candidates("t"),
            Err(RegistryError::MissingDefaultScenario { .. })
        ));
        assert!(registry.scenario_ids().is_empty());
    }
}
