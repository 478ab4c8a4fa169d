//! Deliberation Simulator Core - Rust Engine
//!
//! Simulates repeated rounds of deliberation among N agents over a
//! discrete-choice scenario and measures how fast the population's stance
//! distribution collapses toward consensus.
//!
//! # Architecture
//!
//! - **core**: Round phase machine
//! - **models**: Domain types (Scenario, Agent, ExperimentState)
//! - **decision**: Port to the external decision capability
//! - **exposure**: Per-condition peer context shaping
//! - **peers**: Seeded peer sampling
//! - **metrics**: Entropy and time-to-collapse
//! - **events**: Append-only JSONL event log
//! - **orchestrator**: Round loop, configuration and crash recovery
//! - **rng**: Seed derivation and deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. An agent's stance is always in the scenario vocabulary
//! 2. All randomness is deterministic (derived seeds, seeded RNG)
//! 3. Agents only see peers as they were at the end of the previous round

// Module declarations
pub mod core;
pub mod decision;
pub mod events;
pub mod exposure;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod peers;
pub mod rng;

// Re-exports for convenience
pub use core::rounds::{Phase, RoundClock, TerminationReason};
pub use decision::{CapabilityError, DecisionCapability, DecisionOutput, DecisionRequest};
pub use events::{EventSink, JsonlEventLog, LogRecord, MemoryEventLog};
pub use metrics::{shannon_entropy, time_to_collapse, StanceDistribution};
pub use models::{
    agent::{Agent, AgentCheckpoint, ParseOutcome, RoundRecord},
    scenario::{ChangeReason, Condition, InitialStanceMode, Persona, Scenario, Stance},
    state::ExperimentState,
};
pub use orchestrator::{
    CancellationToken, ExecutionMode, Experiment, ExperimentConfig, ExperimentError, ExperimentSummary,
    RecoveryPoint, ResumeDecision,
};
pub use rng::RngManager;

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn deliberation_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::experiment::PyExperiment>()?;
    m.add_function(wrap_pyfunction!(ffi::experiment::prepare_resume, m)?)?;
    Ok(())
}
