//! Experiment Engine - Main Round Loop
//!
//! Drives one experiment from setup to termination, integrating every
//! component of the simulator.
//!
//! # Architecture
//!
//! ```text
//! Experiment
//!   ├─ ExperimentConfig  (scenario, condition, thresholds, execution mode)
//!   ├─ ExperimentState   (agents sorted by id, entropy history)
//!   ├─ RoundClock        (Setup → InitialThinking → Deliberation → Terminated)
//!   ├─ DecisionCapability (external, shared)
//!   └─ EventSink         (append-only JSONL log)
//! ```
//!
//! # Round Loop
//!
//! Each round executes these steps in order:
//!
//! 1. **Snapshot**: pre-round distribution and a frozen peer view of every
//!    agent; nothing an agent does this round is visible to its peers
//!    until the next round
//! 2. **Plan**: per agent, derive `peer`/`llm` seeds and sample peers
//!    (none in round 0 or when the condition hides peers)
//! 3. **Step**: every agent deliberates once, sequentially or on scoped
//!    worker threads
//! 4. **Log**: `agent_response` records in agent order
//! 5. **Aggregate**: post-round distribution and Shannon entropy
//! 6. **Terminate?**: after any round ≥ 1 whose entropy is below the
//!    early-stop threshold, or after the last configured round
//!
//! # Determinism
//!
//! Given the same config and a capability that answers deterministically
//! for a given request, two runs produce identical logs. Every per-agent
//! input is a function of the frozen snapshot and id-keyed seeds, so
//! parallel and sequential execution are interchangeable.
//!
//! # Example
//!
//! ```
//! use deliberation_core_rs::decision::SeededCapability;
//! use deliberation_core_rs::events::MemoryEventLog;
//! use deliberation_core_rs::models::{Scenario, Stance};
//! use deliberation_core_rs::orchestrator::{Experiment, ExperimentConfig};
//! use std::sync::Arc;
//!
//! let scenario = Scenario::new("ab", "Pick A or B.", vec![Stance::new("A"), Stance::new("B")]);
//! let config = ExperimentConfig { num_agents: 4, num_rounds: 2, ..ExperimentConfig::new(scenario) };
//! let log = MemoryEventLog::new();
//!
//! let mut experiment = Experiment::new(
//!     config,
//!     Arc::new(SeededCapability::new(["A", "B"])),
//!     Box::new(log.clone()),
//! ).unwrap();
//! let summary = experiment.run().unwrap();
//! assert!(summary.entropy_history.len() <= 3);
//! ```

use crate::core::rounds::{Phase, PhaseError, RoundClock, TerminationReason};
use crate::decision::{CapabilityError, DecisionCapability};
use crate::events::{EventLogError, EventSink, JsonlEventLog, LogRecord};
use crate::metrics::{time_to_collapse, StanceDistribution};
use crate::models::agent::{Agent, AgentError, DeliberationContext, RoundRecord, Turn};
use crate::models::scenario::Stance;
use crate::models::state::ExperimentState;
use crate::orchestrator::checkpoint::{compute_config_hash, prepare_resume, validate_recovery, RecoveryPoint, ResumeDecision};
use crate::orchestrator::config::{ConfigError, ExecutionMode, ExperimentConfig};
use crate::peers::{sample_peers, PeerView};
use crate::rng::{AgentSeeds, RngManager};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Decision capability health check failed: {0}")]
    SetupFailed(CapabilityError),

    #[error("Log truncation failed: {0}")]
    TruncationFailed(String),

    #[error("Config hash mismatch: expected {expected}, log has {found}")]
    ConfigMismatch { expected: String, found: String },

    #[error("Recovered state is invalid: {0}")]
    StateValidation(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("Experiment cancelled after round {completed_round:?}")]
    Cancelled { completed_round: Option<usize> },

    #[error("Agent worker thread panicked in round {round}")]
    WorkerPanicked { round: usize },

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative stop signal shared with other threads
///
/// Checked before every round and before every sequential agent step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Aggregates for one finished round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub round: usize,
    pub distribution: StanceDistribution,
    pub entropy: f64,
    /// Agents whose stance differs from the previous round
    pub changes: usize,
    pub parse_failures: usize,
    /// Whether this round ended the experiment
    pub terminated: Option<TerminationReason>,
}

/// Final report of an experiment, also logged as `experiment_end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub experiment_id: String,
    pub config_hash: String,
    pub config: ExperimentConfig,
    pub initial_entropy: f64,
    pub final_entropy: f64,
    /// Entropy after each round, index 0 = round 0
    pub entropy_history: Vec<f64>,
    pub final_distribution: StanceDistribution,
    /// First round from which entropy stays below the consensus threshold
    pub time_to_collapse: Option<usize>,
    pub termination: TerminationReason,
    /// Last complete round recovered from the log, if this run resumed
    pub resumed_from: Option<usize>,
    /// Rounds executed by this process (excludes recovered rounds)
    pub rounds_executed: usize,
    pub parse_failures_total: usize,
    pub parse_failures_per_round: Vec<usize>,
}

// ============================================================================
// Experiment
// ============================================================================

/// Per-agent inputs planned before anyone steps
struct AgentPlan {
    seeds: AgentSeeds,
    peers: Vec<PeerView>,
}

impl AgentPlan {
    fn turn<'a>(&'a self, round: usize, global_stats: Option<&'a StanceDistribution>) -> Turn<'a> {
        Turn {
            round,
            peers: &self.peers,
            llm_seed: self.seeds.llm,
            peer_seed: self.seeds.peer,
            global_stats,
        }
    }
}

pub struct Experiment {
    config: ExperimentConfig,
    experiment_id: String,
    config_hash: String,
    capability: Arc<dyn DecisionCapability>,
    sink: Box<dyn EventSink>,
    state: ExperimentState,
    clock: RoundClock,
    parse_failures: Vec<usize>,
    rounds_executed: usize,
    cancel: CancellationToken,
}

impl Experiment {
    /// Set up a fresh experiment
    ///
    /// Validates the config, checks the capability, creates the agents
    /// and writes the `config` record. Round 0 runs on the first call to
    /// [`Experiment::run`] or [`Experiment::run_round`].
    pub fn new(
        config: ExperimentConfig,
        capability: Arc<dyn DecisionCapability>,
        mut sink: Box<dyn EventSink>,
    ) -> Result<Self, ExperimentError> {
        config.validate()?;
        capability.health_check().map_err(ExperimentError::SetupFailed)?;

        let experiment_id = config.experiment_id();
        let config_hash = compute_config_hash(&config.result_fields())?;

        let mut rng = RngManager::new(config.seed);
        let agents: Vec<Agent> = initial_stances(&config, &mut rng)
            .into_iter()
            .enumerate()
            .map(|(i, stance)| Agent::new(ExperimentConfig::agent_id(i), config.persona_for(i), stance))
            .collect();
        let state = ExperimentState::new(agents);

        sink.append(&LogRecord::Config {
            experiment_id: experiment_id.clone(),
            config_hash: config_hash.clone(),
            config: config.clone(),
        })?;

        info!(
            experiment = %experiment_id,
            agents = config.num_agents,
            rounds = config.num_rounds,
            condition = %config.condition,
            mode = config.initial_stance_mode.as_str(),
            max_entropy = config.scenario.max_entropy(),
            "experiment set up"
        );

        Ok(Self {
            clock: RoundClock::new(config.num_rounds),
            config,
            experiment_id,
            config_hash,
            capability,
            sink,
            state,
            parse_failures: Vec::new(),
            rounds_executed: 0,
            cancel: CancellationToken::new(),
        })
    }

    /// Continue an experiment from a recovery point
    ///
    /// `sink` must append to the already-truncated log; no `config` record
    /// is written again.
    pub fn resume(
        config: ExperimentConfig,
        capability: Arc<dyn DecisionCapability>,
        sink: Box<dyn EventSink>,
        point: RecoveryPoint,
    ) -> Result<Self, ExperimentError> {
        config.validate()?;
        validate_recovery(&point, &config)?;
        capability.health_check().map_err(ExperimentError::SetupFailed)?;

        let experiment_id = config.experiment_id();
        let config_hash = compute_config_hash(&config.result_fields())?;

        let RecoveryPoint {
            last_complete_round,
            mut agent_states,
            mut agent_histories,
            entropy_history,
            parse_failures,
            ..
        } = point;

        let mut agents = Vec::with_capacity(config.num_agents);
        for i in 0..config.num_agents {
            let id = ExperimentConfig::agent_id(i);
            let checkpoint = agent_states
                .remove(&id)
                .ok_or_else(|| ExperimentError::StateValidation(format!("Agent {} missing from log", id)))?;
            let history = agent_histories.remove(&id).unwrap_or_default();
            agents.push(Agent::restore(
                id,
                config.persona_for(i),
                &config.scenario,
                checkpoint,
                history,
            )?);
        }
        let state = ExperimentState::resumed(agents, entropy_history, last_complete_round);

        let mut clock = RoundClock::resumed(config.num_rounds, last_complete_round);
        let last_entropy = state.entropy_history().last().copied().unwrap_or(f64::INFINITY);
        if last_complete_round >= 1 && last_entropy < config.early_stop_entropy {
            clock.terminate(TerminationReason::Converged {
                round: last_complete_round,
                entropy: last_entropy,
            });
        } else if last_complete_round >= config.num_rounds {
            clock.terminate(TerminationReason::Completed);
        }

        info!(
            experiment = %experiment_id,
            resume_round = last_complete_round + 1,
            "experiment resumed"
        );

        Ok(Self {
            config,
            experiment_id,
            config_hash,
            capability,
            sink,
            state,
            clock,
            parse_failures,
            rounds_executed: 0,
            cancel: CancellationToken::new(),
        })
    }

    /// Resume from the log at `path` when possible, else start it fresh
    pub fn open(
        config: ExperimentConfig,
        capability: Arc<dyn DecisionCapability>,
        path: impl AsRef<Path>,
    ) -> Result<Self, ExperimentError> {
        let path = path.as_ref();
        match prepare_resume(path, &config)? {
            ResumeDecision::Resume(point) => {
                let sink = JsonlEventLog::open_append(path)?;
                Self::resume(config, capability, Box::new(sink), point)
            }
            ResumeDecision::Restart { .. } => {
                let sink = JsonlEventLog::create(path)?;
                Self::new(config, capability, Box::new(sink))
            }
        }
    }

    /// Replace the internal token with a shared one
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.clock.phase()
    }

    pub fn is_terminated(&self) -> bool {
        self.clock.is_terminated()
    }

    /// Run every remaining round, then log and return the summary
    pub fn run(&mut self) -> Result<ExperimentSummary, ExperimentError> {
        while !self.clock.is_terminated() {
            self.run_round()?;
        }

        let summary = self.summary();
        self.sink.append(&LogRecord::ExperimentEnd {
            summary: summary.clone(),
        })?;

        info!(
            experiment = %self.experiment_id,
            final_entropy = summary.final_entropy,
            time_to_collapse = ?summary.time_to_collapse,
            termination = ?summary.termination,
            "experiment finished"
        );
        Ok(summary)
    }

    /// Execute the next round
    ///
    /// An error after the round has started (cancellation, a failed log
    /// write, a worker panic) leaves the experiment interrupted; later calls
    /// fail with [`PhaseError::Interrupted`] and the run can only continue
    /// through [`Experiment::open`] on its log.
    pub fn run_round(&mut self) -> Result<RoundResult, ExperimentError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        let round = self
            .clock
            .next_round()
            .unwrap_or(self.clock.num_rounds() + 1);
        self.clock.begin_round(round)?;

        let result = self.execute_round(round);
        if result.is_err() {
            self.clock.interrupt();
            warn!(experiment = %self.experiment_id, round, "round interrupted; resume from the event log");
        }
        result
    }

    /// Everything from `round_start` to the round barrier closing
    fn execute_round(&mut self, round: usize) -> Result<RoundResult, ExperimentError> {
        let scenario = &self.config.scenario;
        let pre_round = self.state.distribution(scenario);
        self.sink.append(&LogRecord::RoundStart {
            round,
            distribution: pre_round.clone(),
        })?;

        let plans = self.plan_round(round);
        let records = self.step_agents(round, &pre_round, &plans)?;
        if matches!(self.config.execution, ExecutionMode::Parallel { .. }) {
            // Logged after the barrier, in id order
            let responses: Vec<LogRecord> = self
                .state
                .agents()
                .iter()
                .zip(&records)
                .map(|(agent, record)| LogRecord::AgentResponse {
                    round,
                    agent_id: agent.id().to_string(),
                    response: record.clone(),
                })
                .collect();
            for response in &responses {
                self.sink.append(response)?;
            }
        }

        let distribution = self.state.distribution(&self.config.scenario);
        let entropy = distribution.entropy();
        let changes = records.iter().filter(|r| r.changed).count();
        let parse_failures = records.iter().filter(|r| !r.parse_success).count();

        let failure_ratio = parse_failures as f64 / self.state.num_agents().max(1) as f64;
        if failure_ratio > self.config.parse_failure_warn_ratio {
            warn!(
                experiment = %self.experiment_id,
                round,
                parse_failures,
                agents = self.state.num_agents(),
                "parse failure rate above threshold"
            );
        }

        self.sink.append(&LogRecord::RoundEnd {
            round,
            distribution: distribution.clone(),
            entropy,
            changes,
            parse_failures,
        })?;
        self.state.complete_round(round, entropy);
        self.parse_failures.push(parse_failures);
        self.rounds_executed += 1;

        info!(
            experiment = %self.experiment_id,
            round,
            entropy,
            changes,
            distribution = %distribution.display_in(&self.config.scenario),
            "round complete"
        );

        let terminated = if round >= 1 && entropy < self.config.early_stop_entropy {
            info!(experiment = %self.experiment_id, round, entropy, "early termination: consensus reached");
            Some(TerminationReason::Converged { round, entropy })
        } else if round >= self.config.num_rounds {
            Some(TerminationReason::Completed)
        } else {
            None
        };
        if let Some(reason) = terminated {
            self.clock.terminate(reason);
        }

        Ok(RoundResult {
            round,
            distribution,
            entropy,
            changes,
            parse_failures,
            terminated,
        })
    }

    /// Seeds and peer samples for every agent, from the frozen snapshot
    fn plan_round(&self, round: usize) -> Vec<AgentPlan> {
        let snapshot = self.state.peer_views();
        let shows_peers = round > 0 && self.config.condition.exposure().shows_peers();
        let k = self.config.effective_sample_k();

        self.state
            .agents()
            .iter()
            .map(|agent| {
                let seeds = AgentSeeds::derive(self.config.seed, round, agent.id());
                let peers = if shows_peers {
                    sample_peers(&snapshot, agent.id(), k, seeds.peer)
                } else {
                    Vec::new()
                };
                AgentPlan { seeds, peers }
            })
            .collect()
    }

    /// Step every agent once; sequential mode logs as it goes
    fn step_agents(
        &mut self,
        round: usize,
        pre_round: &StanceDistribution,
        plans: &[AgentPlan],
    ) -> Result<Vec<RoundRecord>, ExperimentError> {
        let ctx = DeliberationContext {
            scenario: &self.config.scenario,
            condition: self.config.condition,
            initial_stance_mode: self.config.initial_stance_mode,
            temperature: self.config.temperature,
            peer_rationale_chars: self.config.peer_rationale_chars,
            own_rationale_chars: self.config.own_rationale_chars,
        };
        let global_stats = (round > 0 && self.config.condition.exposure().aggregate_stats).then_some(pre_round);
        let capability: &dyn DecisionCapability = self.capability.as_ref();
        let agents = self.state.agents_mut();

        match self.config.execution {
            ExecutionMode::Sequential => {
                let mut records = Vec::with_capacity(agents.len());
                for (agent, plan) in agents.iter_mut().zip(plans) {
                    if self.cancel.is_cancelled() {
                        return Err(ExperimentError::Cancelled {
                            completed_round: round.checked_sub(1),
                        });
                    }
                    let record = agent.step(&ctx, capability, &plan.turn(round, global_stats));
                    debug!(agent = %agent.id(), round, stance = %record.stance, changed = record.changed, "agent stepped");
                    self.sink.append(&LogRecord::AgentResponse {
                        round,
                        agent_id: agent.id().to_string(),
                        response: record.clone(),
                    })?;
                    records.push(record);
                }
                Ok(records)
            }
            ExecutionMode::Parallel { workers } => {
                let chunk_size = agents.len().div_ceil(workers.max(1)).max(1);
                std::thread::scope(|scope| -> Result<Vec<RoundRecord>, ExperimentError> {
                    let handles: Vec<_> = agents
                        .chunks_mut(chunk_size)
                        .zip(plans.chunks(chunk_size))
                        .map(|(chunk, chunk_plans)| {
                            let ctx = &ctx;
                            scope.spawn(move || {
                                chunk
                                    .iter_mut()
                                    .zip(chunk_plans)
                                    .map(|(agent, plan)| agent.step(ctx, capability, &plan.turn(round, global_stats)))
                                    .collect::<Vec<_>>()
                            })
                        })
                        .collect();

                    let mut records = Vec::new();
                    for handle in handles {
                        let chunk_records = handle
                            .join()
                            .map_err(|_| ExperimentError::WorkerPanicked { round })?;
                        records.extend(chunk_records);
                    }
                    Ok(records)
                })
            }
        }
    }

    fn cancelled(&self) -> ExperimentError {
        ExperimentError::Cancelled {
            completed_round: self.state.completed_round(),
        }
    }

    /// Summary of the experiment as it stands
    pub fn summary(&self) -> ExperimentSummary {
        let history = self.state.entropy_history().to_vec();
        let termination = match self.clock.phase() {
            Phase::Terminated(reason) => reason,
            _ => TerminationReason::Completed,
        };
        ExperimentSummary {
            experiment_id: self.experiment_id.clone(),
            config_hash: self.config_hash.clone(),
            config: self.config.clone(),
            initial_entropy: history.first().copied().unwrap_or(0.0),
            final_entropy: history.last().copied().unwrap_or(0.0),
            time_to_collapse: time_to_collapse(&history, self.config.consensus_entropy),
            entropy_history: history,
            final_distribution: self.state.distribution(&self.config.scenario),
            termination,
            resumed_from: self.clock.resumed_from(),
            rounds_executed: self.rounds_executed,
            parse_failures_total: self.parse_failures.iter().sum(),
            parse_failures_per_round: self.parse_failures.clone(),
        }
    }
}

/// Starting stances for a fresh population
///
/// A balanced split assigns `stances[0]` to `n / 2` agents and
/// `stances[1]` to the rest, shuffled; otherwise each agent samples from
/// the scenario's initial bias, or uniformly when there is none.
fn initial_stances(config: &ExperimentConfig, rng: &mut RngManager) -> Vec<Stance> {
    let stances = &config.scenario.stances;
    let n = config.num_agents;

    if config.initial_stance_mode.uses_balanced_split() && stances.len() >= 2 {
        let half = n / 2;
        let mut assigned: Vec<Stance> = std::iter::repeat(stances[0].clone())
            .take(half)
            .chain(std::iter::repeat(stances[1].clone()).take(n - half))
            .collect();
        rng.shuffle(&mut assigned);
        return assigned;
    }

    (0..n)
        .map(|_| match config.scenario.initial_bias {
            Some(bias) if stances.len() >= 2 => {
                if rng.chance(bias) {
                    stances[0].clone()
                } else {
                    stances[1].clone()
                }
            }
            _ => stances[rng.index(stances.len())].clone(),
        })
        .collect()
}
