//! Experiment State
//!
//! Everything that changes while an experiment runs: the agents, the
//! entropy history and the round pointer.
//!
//! # Critical Invariants
//!
//! 1. **Id order**: agents are kept sorted by id, which is also log order
//! 2. **History alignment**: `entropy_history[r]` is the entropy after round r
//! 3. **Round pointer**: `completed_round` is the last round whose entropy
//!    has been recorded (`None` before round 0 finishes)

use crate::metrics::StanceDistribution;
use crate::models::agent::{Agent, AgentCheckpoint};
use crate::models::scenario::Scenario;
use crate::peers::PeerView;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ExperimentState {
    agents: Vec<Agent>,
    entropy_history: Vec<f64>,
    completed_round: Option<usize>,
}

impl ExperimentState {
    pub fn new(mut agents: Vec<Agent>) -> Self {
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        Self {
            agents,
            entropy_history: Vec::new(),
            completed_round: None,
        }
    }

    /// State at a resume boundary: the history covers rounds `0..=round`
    pub fn resumed(agents: Vec<Agent>, entropy_history: Vec<f64>, round: usize) -> Self {
        let mut state = Self::new(agents);
        state.entropy_history = entropy_history;
        state.completed_round = Some(round);
        state
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents
            .binary_search_by(|a| a.id().cmp(id))
            .ok()
            .map(|i| &self.agents[i])
    }

    pub fn distribution(&self, scenario: &Scenario) -> StanceDistribution {
        StanceDistribution::from_stances(scenario, self.agents.iter().map(Agent::stance))
    }

    /// Frozen peer-facing snapshot of every agent
    pub fn peer_views(&self) -> Vec<PeerView> {
        self.agents.iter().map(Agent::peer_view).collect()
    }

    pub fn checkpoints(&self) -> BTreeMap<String, AgentCheckpoint> {
        self.agents
            .iter()
            .map(|a| (a.id().to_string(), a.checkpoint()))
            .collect()
    }

    pub fn entropy_history(&self) -> &[f64] {
        &self.entropy_history
    }

    pub fn completed_round(&self) -> Option<usize> {
        self.completed_round
    }

    /// Close a round: record its entropy and advance the pointer
    pub fn complete_round(&mut self, round: usize, entropy: f64) {
        debug_assert_eq!(
            self.entropy_history.len(),
            round,
            "entropy history must stay aligned with round numbers"
        );
        self.entropy_history.push(entropy);
        self.completed_round = Some(round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scenario::{Persona, Stance};

    #[test]
    fn test_agents_sorted_and_lookup() {
        let agents = vec![
            Agent::new("agent_002".into(), Persona::default(), Stance::new("A")),
            Agent::new("agent_000".into(), Persona::default(), Stance::new("B")),
            Agent::new("agent_001".into(), Persona::default(), Stance::new("A")),
        ];
        let state = ExperimentState::new(agents);
        let ids: Vec<&str> = state.agents().iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["agent_000", "agent_001", "agent_002"]);
        assert_eq!(state.agent("agent_000").map(|a| a.stance().as_str()), Some("B"));
        assert!(state.agent("agent_009").is_none());
    }

    #[test]
    fn test_complete_round_advances_pointer() {
        let mut state = ExperimentState::new(Vec::new());
        assert_eq!(state.completed_round(), None);
        state.complete_round(0, 1.0);
        state.complete_round(1, 0.5);
        assert_eq!(state.completed_round(), Some(1));
        assert_eq!(state.entropy_history(), &[1.0, 0.5]);
    }
}
