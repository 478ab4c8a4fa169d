//! Checkpoint - Crash Recovery from the Event Log
//!
//! There is no separate snapshot file: the append-only event log is the
//! checkpoint. Recovery reads it back, finds the last round that was fully
//! written, rebuilds agent state from it, and truncates everything after.
//!
//! # Critical Invariants
//!
//! - **Completeness**: a round counts only if it has a `round_end` record
//!   and exactly one `agent_response` per configured agent
//! - **Prefix**: rounds are visited in log order; the first incomplete
//!   round ends the scan even if later rounds look complete
//! - **Config Matching**: a log can only be resumed with the config whose
//!   hash it recorded
//! - **Idempotent truncation**: truncating twice to the same round leaves
//!   the same bytes on disk

use crate::events::{read_log, LogRecord};
use crate::models::agent::{AgentCheckpoint, RoundRecord};
use crate::orchestrator::config::ExperimentConfig;
use crate::orchestrator::engine::ExperimentError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// Recovery Structures
// ============================================================================

/// Everything needed to resume after the last complete round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    pub last_complete_round: usize,

    /// Latest `{stance, rationale}` per agent at or before that round
    pub agent_states: BTreeMap<String, AgentCheckpoint>,

    /// Every round record per agent, rounds `0..=last_complete_round`
    pub agent_histories: BTreeMap<String, Vec<RoundRecord>>,

    /// Entropy after each complete round
    pub entropy_history: Vec<f64>,

    /// Parse failures per complete round
    pub parse_failures: Vec<usize>,

    /// Hash from the log's `config` record, if present
    pub config_hash: Option<String>,

    /// Records up to and including the last complete `round_end`
    pub records_to_keep: usize,
}

/// What the caller should do with an existing log
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    /// Log truncated; continue from `point.last_complete_round + 1`
    Resume(RecoveryPoint),
    /// Nothing usable; start a fresh log from round 0
    Restart { reason: String },
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of config
///
/// Uses canonical JSON serialization with sorted keys so the hash does not
/// depend on field or map ordering.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, ExperimentError> {
    use serde_json::Value;

    let value = serde_json::to_value(config)?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Log Scanning
// ============================================================================

/// Scan records for the last fully written round
///
/// Returns `None` when not even round 0 is complete.
pub fn find_last_complete_round(records: &[LogRecord], num_agents: usize) -> Option<RecoveryPoint> {
    let mut point = RecoveryPoint {
        last_complete_round: 0,
        agent_states: BTreeMap::new(),
        agent_histories: BTreeMap::new(),
        entropy_history: Vec::new(),
        parse_failures: Vec::new(),
        config_hash: None,
        records_to_keep: 0,
    };
    let mut expected_round = 0;
    let mut pending: Vec<(&str, &RoundRecord)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match record {
            LogRecord::Config { config_hash, .. } => {
                if point.config_hash.is_none() {
                    point.config_hash = Some(config_hash.clone());
                }
            }
            LogRecord::RoundStart { round, .. } => {
                if *round != expected_round || !pending.is_empty() {
                    break;
                }
            }
            LogRecord::AgentResponse {
                round,
                agent_id,
                response,
            } => {
                if *round != expected_round {
                    break;
                }
                pending.push((agent_id.as_str(), response));
            }
            LogRecord::RoundEnd {
                round,
                entropy,
                parse_failures,
                ..
            } => {
                let distinct: BTreeSet<&str> = pending.iter().map(|(id, _)| *id).collect();
                if *round != expected_round || pending.len() != num_agents || distinct.len() != num_agents {
                    break;
                }
                for (agent_id, response) in pending.drain(..) {
                    point.agent_states.insert(
                        agent_id.to_string(),
                        AgentCheckpoint {
                            stance: response.stance.clone(),
                            rationale: response.rationale.clone(),
                        },
                    );
                    point
                        .agent_histories
                        .entry(agent_id.to_string())
                        .or_default()
                        .push(response.clone());
                }
                point.entropy_history.push(*entropy);
                point.parse_failures.push(*parse_failures);
                point.last_complete_round = *round;
                point.records_to_keep = index + 1;
                expected_round += 1;
            }
            LogRecord::ExperimentEnd { .. } => break,
        }
    }

    (!point.entropy_history.is_empty()).then_some(point)
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Check a recovery point against the config it will resume with
///
/// - the log's config hash (when recorded) matches `config`'s result fields
/// - every configured agent is restored, with a stance in the vocabulary
/// - entropy history covers exactly rounds `0..=last_complete_round`
pub fn validate_recovery(point: &RecoveryPoint, config: &ExperimentConfig) -> Result<(), ExperimentError> {
    if let Some(found) = &point.config_hash {
        let expected = compute_config_hash(&config.result_fields())?;
        if *found != expected {
            return Err(ExperimentError::ConfigMismatch {
                expected,
                found: found.clone(),
            });
        }
    }

    if point.agent_states.len() != config.num_agents {
        return Err(ExperimentError::StateValidation(format!(
            "Log restores {} agents, config has {}",
            point.agent_states.len(),
            config.num_agents
        )));
    }

    for index in 0..config.num_agents {
        let agent_id = ExperimentConfig::agent_id(index);
        let state = point.agent_states.get(&agent_id).ok_or_else(|| {
            ExperimentError::StateValidation(format!("Agent {} missing from log", agent_id))
        })?;
        if !config.scenario.contains(&state.stance) {
            return Err(ExperimentError::StateValidation(format!(
                "Agent {} restored with stance {} outside the vocabulary",
                agent_id, state.stance
            )));
        }
    }

    if point.entropy_history.len() != point.last_complete_round + 1 {
        return Err(ExperimentError::StateValidation(format!(
            "Entropy history has {} entries for {} complete rounds",
            point.entropy_history.len(),
            point.last_complete_round + 1
        )));
    }

    if point.last_complete_round > config.num_rounds {
        return Err(ExperimentError::StateValidation(format!(
            "Log reaches round {} but config has only {} rounds",
            point.last_complete_round, config.num_rounds
        )));
    }

    Ok(())
}

// ============================================================================
// Truncation
// ============================================================================

/// Drop every line after `round`'s `round_end` record
///
/// Kept lines are copied verbatim to a sibling temp file, synced, then
/// renamed over the log. Returns the number of records kept.
pub fn truncate_log_to_round(path: impl AsRef<Path>, round: usize) -> Result<usize, ExperimentError> {
    let path = path.as_ref();
    let contents = read_log(path).map_err(|e| ExperimentError::TruncationFailed(e.to_string()))?;

    let keep = contents
        .lines
        .iter()
        .position(|line| matches!(line.record, LogRecord::RoundEnd { round: r, .. } if r == round))
        .map(|index| index + 1)
        .ok_or_else(|| {
            ExperimentError::TruncationFailed(format!(
                "No round_end for round {} in {}",
                round,
                path.display()
            ))
        })?;

    let temp_path = temp_sibling(path);
    let write = || -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        for line in &contents.lines[..keep] {
            writeln!(file, "{}", line.text)?;
        }
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(ExperimentError::TruncationFailed(format!(
            "Failed to rewrite {}: {}",
            path.display(),
            e
        )));
    }

    info!(
        path = %path.display(),
        round,
        kept = keep,
        dropped = contents.lines.len() - keep + contents.discarded_lines,
        "log truncated"
    );
    Ok(keep)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read, scan, validate and truncate an existing log
///
/// Anything short of a clean recovery point yields `Restart`; only
/// unexpected hashing failures surface as errors.
pub fn prepare_resume(path: impl AsRef<Path>, config: &ExperimentConfig) -> Result<ResumeDecision, ExperimentError> {
    let path = path.as_ref();
    let restart = |reason: String| -> Result<ResumeDecision, ExperimentError> {
        warn!(path = %path.display(), %reason, "cannot resume, restarting from round 0");
        Ok(ResumeDecision::Restart { reason })
    };

    if !path.exists() {
        return Ok(ResumeDecision::Restart {
            reason: "no existing log".to_string(),
        });
    }

    let contents = match read_log(path) {
        Ok(contents) => contents,
        Err(e) => return restart(e.to_string()),
    };
    let records: Vec<LogRecord> = contents.lines.into_iter().map(|line| line.record).collect();

    let Some(point) = find_last_complete_round(&records, config.num_agents) else {
        return restart("no complete round in log".to_string());
    };

    match validate_recovery(&point, config) {
        Ok(()) => {}
        Err(e @ (ExperimentError::ConfigMismatch { .. } | ExperimentError::StateValidation(_))) => {
            return restart(e.to_string())
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = truncate_log_to_round(path, point.last_complete_round) {
        return restart(e.to_string());
    }

    info!(
        path = %path.display(),
        last_complete_round = point.last_complete_round,
        "resuming experiment"
    );
    Ok(ResumeDecision::Resume(point))
}
