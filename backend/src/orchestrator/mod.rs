//! Orchestrator - experiment lifecycle
//!
//! Setup, the synchronized round loop, early termination and crash
//! recovery from the event log.
//!
//! See `engine.rs` for the round loop and `checkpoint.rs` for recovery.

pub mod checkpoint;
pub mod config;
pub mod engine;

// Re-export main types for convenience
pub use config::{ConfigError, ExecutionMode, ExperimentConfig, ResultFields};
pub use engine::{CancellationToken, Experiment, ExperimentError, ExperimentSummary, RoundResult};

// Re-export recovery types
pub use checkpoint::{
    compute_config_hash, find_last_complete_round, prepare_resume, truncate_log_to_round, validate_recovery,
    RecoveryPoint, ResumeDecision,
};
