//! Experiment configuration
//!
//! Everything a batch caller supplies to run one experiment. Every field
//! has a default, so a JSON config only needs the scenario:
//!
//! ```json
//! {
//!   "scenario": {"id": "trolley", "description": "...", "stances": ["PULL", "DONT_PULL"]},
//!   "condition": "C3_ANON_BANDWAGON",
//!   "initial_stance_mode": "ENFORCED",
//!   "seed": 7
//! }
//! ```

use crate::metrics::{CONSENSUS_ENTROPY, EARLY_STOP_ENTROPY};
use crate::models::scenario::{Condition, InitialStanceMode, Persona, Scenario, ScenarioError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid scenario: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("num_agents must be at least 1")]
    NoAgents,

    #[error("{field} must be a finite, non-negative number (got {value})")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("parallel execution needs at least one worker")]
    NoWorkers,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How agents within a round are stepped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    /// Scoped worker threads over disjoint agent chunks
    Parallel { workers: usize },
}

/// Complete experiment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Overrides the derived `{scenario}_{condition}_S{seed}` id
    pub experiment_id: Option<String>,

    pub scenario: Scenario,

    /// Agent i gets `personas[i % len]`; empty means the default persona
    pub personas: Vec<Persona>,

    pub num_agents: usize,

    /// Deliberation rounds after round 0
    pub num_rounds: usize,

    /// Peers shown per agent per round (clamped to population - 1)
    pub sample_k: usize,

    /// Run seed for all seed derivation
    pub seed: u64,

    pub condition: Condition,

    pub initial_stance_mode: InitialStanceMode,

    /// Forwarded to the decision capability untouched
    pub temperature: f64,

    /// Stop after any round >= 1 whose entropy falls below this
    pub early_stop_entropy: f64,

    /// Threshold used for time-to-collapse
    pub consensus_entropy: f64,

    pub peer_rationale_chars: usize,

    pub own_rationale_chars: usize,

    pub execution: ExecutionMode,

    /// Warn when a round's parse-failure fraction exceeds this
    pub parse_failure_warn_ratio: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            experiment_id: None,
            scenario: Scenario::new(
                "binary_choice",
                "Choose between option A and option B.",
                vec!["A".into(), "B".into()],
            ),
            personas: Vec::new(),
            num_agents: 30,
            num_rounds: 10,
            sample_k: 5,
            seed: 0,
            condition: Condition::C1Full,
            initial_stance_mode: InitialStanceMode::None,
            temperature: 0.2,
            early_stop_entropy: EARLY_STOP_ENTROPY,
            consensus_entropy: CONSENSUS_ENTROPY,
            peer_rationale_chars: 200,
            own_rationale_chars: 300,
            execution: ExecutionMode::Sequential,
            parse_failure_warn_ratio: 0.5,
        }
    }
}

impl ExperimentConfig {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scenario.validate()?;
        if self.num_agents == 0 {
            return Err(ConfigError::NoAgents);
        }
        for (field, value) in [
            ("temperature", self.temperature),
            ("early_stop_entropy", self.early_stop_entropy),
            ("consensus_entropy", self.consensus_entropy),
            ("parse_failure_warn_ratio", self.parse_failure_warn_ratio),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeValue { field, value });
            }
        }
        if let ExecutionMode::Parallel { workers: 0 } = self.execution {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Explicit id, or `{scenario}_{condition}_S{seed}`
    pub fn experiment_id(&self) -> String {
        self.experiment_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}_S{}", self.scenario.id, self.condition.as_str(), self.seed))
    }

    pub fn persona_for(&self, index: usize) -> Persona {
        if self.personas.is_empty() {
            Persona::default()
        } else {
            self.personas[index % self.personas.len()].clone()
        }
    }

    pub fn agent_id(index: usize) -> String {
        format!("agent_{:03}", index)
    }

    /// Peer sample size actually used for a population of `num_agents`
    pub fn effective_sample_k(&self) -> usize {
        self.sample_k.min(self.num_agents.saturating_sub(1))
    }

    /// View over the fields that determine results; this is what gets hashed
    pub fn result_fields(&self) -> ResultFields<'_> {
        ResultFields {
            scenario: &self.scenario,
            personas: &self.personas,
            num_agents: self.num_agents,
            num_rounds: self.num_rounds,
            sample_k: self.sample_k,
            seed: self.seed,
            condition: self.condition,
            initial_stance_mode: self.initial_stance_mode,
            temperature: self.temperature,
            early_stop_entropy: self.early_stop_entropy,
            consensus_entropy: self.consensus_entropy,
            peer_rationale_chars: self.peer_rationale_chars,
            own_rationale_chars: self.own_rationale_chars,
        }
    }
}

/// Result-defining subset of [`ExperimentConfig`]
///
/// Leaves out the id label, the execution mode and the warning ratio, so a
/// log written sequentially can be resumed in parallel and vice versa.
#[derive(Debug, Serialize)]
pub struct ResultFields<'a> {
    pub scenario: &'a Scenario,
    pub personas: &'a [Persona],
    pub num_agents: usize,
    pub num_rounds: usize,
    pub sample_k: usize,
    pub seed: u64,
    pub condition: Condition,
    pub initial_stance_mode: InitialStanceMode,
    pub temperature: f64,
    pub early_stop_entropy: f64,
    pub consensus_entropy: f64,
    pub peer_rationale_chars: usize,
    pub own_rationale_chars: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = ExperimentConfig::from_json_str(
            r#"{"scenario": {"id": "trolley", "description": "d", "stances": ["PULL", "DONT_PULL"]}}"#,
        )
        .unwrap();
        assert_eq!(config.num_agents, 30);
        assert_eq!(config.num_rounds, 10);
        assert_eq!(config.condition, Condition::C1Full);
        assert_eq!(config.execution, ExecutionMode::Sequential);
        assert_eq!(config.experiment_id(), "trolley_C1_FULL_S0");
        config.validate().unwrap();
    }

    #[test]
    fn test_parallel_mode_json() {
        let config = ExperimentConfig::from_json_str(
            r#"{"execution": {"mode": "parallel", "workers": 4}, "condition": "C4_PURE_INFO"}"#,
        )
        .unwrap();
        assert_eq!(config.execution, ExecutionMode::Parallel { workers: 4 });
        assert_eq!(config.condition, Condition::C4PureInfo);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.num_agents = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoAgents)));

        let mut config = ExperimentConfig::default();
        config.early_stop_entropy = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeValue { field: "early_stop_entropy", .. })
        ));

        let mut config = ExperimentConfig::default();
        config.scenario.stances.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Scenario(_))));
    }

    #[test]
    fn test_persona_rotation_and_sample_clamp() {
        let mut config = ExperimentConfig::default();
        assert_eq!(config.persona_for(3), Persona::default());

        config.personas = vec![Persona::new("P0", "a"), Persona::new("P1", "b")];
        assert_eq!(config.persona_for(3).name, "P1");

        config.num_agents = 3;
        config.sample_k = 5;
        assert_eq!(config.effective_sample_k(), 2);
        assert_eq!(ExperimentConfig::agent_id(7), "agent_007");
    }
}
