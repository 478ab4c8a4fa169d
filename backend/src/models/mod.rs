//! Domain models for the deliberation simulator

pub mod agent;
pub mod scenario;
pub mod state;

// Re-exports
pub use agent::{
    parse_decision, Agent, AgentCheckpoint, AgentError, DeliberationContext, ParseOutcome, ParsedDecision,
    RoundRecord, Turn,
};
pub use scenario::{ChangeReason, Condition, InitialStanceMode, Persona, Scenario, ScenarioError, Stance};
pub use state::ExperimentState;
