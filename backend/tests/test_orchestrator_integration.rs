//! Integration tests for the Experiment round loop
//!
//! These tests validate the complete cycle from setup through round 0,
//! deliberation rounds, aggregation and early termination.

use deliberation_core_rs::decision::{DecisionOutput, DecisionRequest, ScriptedCapability, SeededCapability};
use deliberation_core_rs::events::{LogRecord, MemoryEventLog};
use deliberation_core_rs::models::{Condition, InitialStanceMode, Persona, Scenario, Stance};
use deliberation_core_rs::orchestrator::{
    CancellationToken, ExecutionMode, Experiment, ExperimentConfig, ExperimentError,
};
use deliberation_core_rs::TerminationReason;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Helper function to create a basic A/B configuration
fn ab_config(num_agents: usize, num_rounds: usize) -> ExperimentConfig {
    let scenario = Scenario::new("ab", "Choose A or B.", vec![Stance::new("A"), Stance::new("B")]);
    ExperimentConfig {
        num_agents,
        num_rounds,
        sample_k: 3,
        seed: 42,
        ..ExperimentConfig::new(scenario)
    }
}

fn answer(stance: &str) -> DecisionOutput {
    DecisionOutput::structured(json!({
        "stance": stance,
        "rationale": format!("{} is better.", stance),
        "changed": false,
        "change_reason": "INFORMATIONAL",
    }))
}

/// Stance assigned in round 0 under ENFORCED/SOFT, read back from the prompt
fn assigned_stance(request: &DecisionRequest) -> &'static str {
    if request.prompt.contains("position A.") || request.prompt.contains("toward A,") {
        "A"
    } else {
        "B"
    }
}

fn round_records(log: &MemoryEventLog) -> Vec<LogRecord> {
    log.records()
        .into_iter()
        .filter(|r| matches!(r.record_type(), "round_start" | "agent_response" | "round_end"))
        .collect()
}

fn round_ends(log: &MemoryEventLog) -> Vec<(usize, f64)> {
    log.records()
        .into_iter()
        .filter_map(|r| match r {
            LogRecord::RoundEnd { round, entropy, .. } => Some((round, entropy)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Early termination
// ============================================================================

#[test]
fn test_collapse_triggers_early_stop() {
    // 10 agents, balanced 5/5 → 9/1 → 10/0, stop before round 3
    let capability = Arc::new(ScriptedCapability::new(|req| {
        Ok(match req.round {
            0 => answer(assigned_stance(req)),
            1 if req.agent_id == "agent_000" => answer("B"),
            _ => answer("A"),
        })
    }));
    let log = MemoryEventLog::new();
    let config = ExperimentConfig {
        initial_stance_mode: InitialStanceMode::Enforced,
        ..ab_config(10, 5)
    };

    let mut experiment = Experiment::new(config, capability.clone(), Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    let ends = round_ends(&log);
    assert_eq!(ends.len(), 3);
    assert!((ends[0].1 - 1.0).abs() < 1e-12);
    assert!((ends[1].1 - 0.469).abs() < 1e-3);
    assert_eq!(ends[2].1, 0.0);

    assert_eq!(capability.call_count(), 30, "round 3 must never run");
    assert_eq!(
        summary.termination,
        TerminationReason::Converged { round: 2, entropy: 0.0 }
    );
    assert_eq!(summary.time_to_collapse, Some(1));
    assert_eq!(summary.final_distribution.count(&Stance::new("A")), 10);
    assert_eq!(summary.rounds_executed, 3);
    assert!(log
        .records()
        .iter()
        .all(|r| r.round().map_or(true, |round| round <= 2)));
    assert!(matches!(log.records().last(), Some(LogRecord::ExperimentEnd { .. })));
}

#[test]
fn test_round_zero_consensus_does_not_stop() {
    let log = MemoryEventLog::new();
    let capability = Arc::new(ScriptedCapability::constant("A"));

    let mut experiment = Experiment::new(ab_config(6, 4), capability.clone(), Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    // Round 0 already has H = 0, but only rounds ≥ 1 may stop the run
    assert_eq!(round_ends(&log).len(), 2);
    assert_eq!(summary.termination, TerminationReason::Converged { round: 1, entropy: 0.0 });
    assert_eq!(summary.time_to_collapse, Some(0));
}

#[test]
fn test_runs_all_rounds_without_consensus() {
    let capability = Arc::new(ScriptedCapability::new(|req| {
        let index: usize = req.agent_id.trim_start_matches("agent_").parse().unwrap();
        Ok(answer(if index % 2 == 0 { "A" } else { "B" }))
    }));
    let log = MemoryEventLog::new();

    let mut experiment = Experiment::new(ab_config(8, 3), capability, Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    assert_eq!(summary.termination, TerminationReason::Completed);
    assert_eq!(summary.entropy_history, vec![1.0, 1.0, 1.0, 1.0]);
    assert_eq!(summary.time_to_collapse, None);
    assert_eq!(summary.initial_entropy, 1.0);
    assert_eq!(summary.final_entropy, 1.0);
}

#[test]
fn test_custom_early_stop_threshold() {
    let capability = Arc::new(ScriptedCapability::new(|req| {
        Ok(answer(if req.agent_id == "agent_000" { "B" } else { "A" }))
    }));
    let log = MemoryEventLog::new();
    let config = ExperimentConfig {
        early_stop_entropy: 0.5,
        ..ab_config(10, 6)
    };

    let mut experiment = Experiment::new(config, capability, Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    // 9/1 is H ≈ 0.469, below the raised threshold
    assert!(matches!(summary.termination, TerminationReason::Converged { round: 1, .. }));
}

// ============================================================================
// Round structure
// ============================================================================

#[test]
fn test_every_round_is_complete_in_log() {
    let log = MemoryEventLog::new();
    let capability = Arc::new(SeededCapability::new(["A", "B"]));
    let mut experiment = Experiment::new(ab_config(9, 5), capability, Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    let records = log.records();
    assert!(matches!(records.first(), Some(LogRecord::Config { .. })));
    for round in 0..summary.entropy_history.len() {
        let responses = records
            .iter()
            .filter(|r| matches!(r, LogRecord::AgentResponse { round: rr, .. } if *rr == round))
            .count();
        assert_eq!(responses, 9, "round {} incomplete", round);
    }
}

#[test]
fn test_changes_match_stance_differences() {
    let log = MemoryEventLog::new();
    let capability = Arc::new(SeededCapability::new(["A", "B"]));
    let mut experiment = Experiment::new(ab_config(10, 4), capability, Box::new(log.clone())).unwrap();
    experiment.run().unwrap();

    let mut changes_per_round = std::collections::BTreeMap::new();
    for record in log.records() {
        if let LogRecord::AgentResponse { round, response, .. } = record {
            assert_eq!(response.changed, response.stance != response.previous_stance);
            *changes_per_round.entry(round).or_insert(0usize) += usize::from(response.changed);
        }
    }
    for record in log.records() {
        if let LogRecord::RoundEnd { round, changes, .. } = record {
            assert_eq!(changes, changes_per_round[&round]);
        }
    }
}

#[test]
fn test_balanced_split_for_odd_population() {
    let log = MemoryEventLog::new();
    let config = ExperimentConfig {
        initial_stance_mode: InitialStanceMode::Soft,
        ..ab_config(7, 1)
    };
    let capability = Arc::new(ScriptedCapability::new(|req| Ok(answer(assigned_stance(req)))));
    let mut experiment = Experiment::new(config, capability, Box::new(log.clone())).unwrap();

    let start = experiment.state().distribution(&experiment.config().scenario);
    assert_eq!(start.count(&Stance::new("A")), 3);
    assert_eq!(start.count(&Stance::new("B")), 4);

    let round0 = experiment.run_round().unwrap();
    assert_eq!(round0.changes, 0);
}

#[test]
fn test_personas_rotate_over_agents() {
    let config = ExperimentConfig {
        personas: vec![Persona::new("Skeptic", "Doubts."), Persona::new("Optimist", "Hopes.")],
        ..ab_config(5, 1)
    };
    let experiment = Experiment::new(
        config,
        Arc::new(ScriptedCapability::constant("A")),
        Box::new(MemoryEventLog::new()),
    )
    .unwrap();

    let names: Vec<&str> = experiment
        .state()
        .agents()
        .iter()
        .map(|a| a.persona().name.as_str())
        .collect();
    assert_eq!(names, vec!["Skeptic", "Optimist", "Skeptic", "Optimist", "Skeptic"]);
}

// ============================================================================
// Exposure
// ============================================================================

#[test]
fn test_c0_agents_never_see_peers() {
    let log = MemoryEventLog::new();
    let config = ExperimentConfig {
        condition: Condition::C0Independent,
        ..ab_config(6, 3)
    };
    let capability = Arc::new(SeededCapability::new(["A", "B"]));
    let mut experiment = Experiment::new(config, capability, Box::new(log.clone())).unwrap();
    experiment.run().unwrap();

    for record in log.records() {
        if let LogRecord::AgentResponse { response, .. } = record {
            assert!(response.peer_sample_ids.is_empty());
        }
    }
}

#[test]
fn test_peer_samples_exclude_self_and_respect_k() {
    let log = MemoryEventLog::new();
    let capability = Arc::new(SeededCapability::new(["A", "B"]));
    let mut experiment = Experiment::new(ab_config(6, 3), capability, Box::new(log.clone())).unwrap();
    experiment.run().unwrap();

    for record in log.records() {
        if let LogRecord::AgentResponse { round, agent_id, response } = record {
            if round == 0 {
                assert!(response.peer_sample_ids.is_empty());
            } else {
                assert_eq!(response.peer_sample_ids.len(), 3);
                assert!(!response.peer_sample_ids.contains(&agent_id));
            }
        }
    }
}

#[test]
fn test_peers_are_seen_as_of_previous_round() {
    // Everyone flips A → B in round 1; no round-1 prompt may show a B peer
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&prompts);
    let capability = Arc::new(ScriptedCapability::new(move |req| {
        if req.round == 1 {
            recorder.lock().unwrap().push(req.prompt.clone());
        }
        Ok(answer(if req.round == 0 { "A" } else { "B" }))
    }));
    let config = ExperimentConfig {
        condition: Condition::C2StanceOnly,
        ..ab_config(6, 1)
    };

    let mut experiment = Experiment::new(config, capability, Box::new(MemoryEventLog::new())).unwrap();
    experiment.run().unwrap();

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 6);
    for prompt in prompts.iter() {
        assert!(prompt.contains("): A"));
        assert!(!prompt.contains("): B"));
    }
}

// ============================================================================
// Execution modes
// ============================================================================

#[test]
fn test_parallel_matches_sequential() {
    let run = |execution: ExecutionMode| {
        let log = MemoryEventLog::new();
        let config = ExperimentConfig {
            execution,
            condition: Condition::C3AnonBandwagon,
            ..ab_config(20, 6)
        };
        let capability = Arc::new(SeededCapability::new(["A", "B"]));
        let mut experiment = Experiment::new(config, capability, Box::new(log.clone())).unwrap();
        let summary = experiment.run().unwrap();
        (round_records(&log), summary.entropy_history)
    };

    let sequential = run(ExecutionMode::Sequential);
    for workers in [1, 3, 8, 64] {
        assert_eq!(run(ExecutionMode::Parallel { workers }), sequential, "{} workers", workers);
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_failed_health_check_aborts_setup() {
    let log = MemoryEventLog::new();
    let capability = Arc::new(ScriptedCapability::constant("A").unavailable("endpoint down"));

    let result = Experiment::new(ab_config(4, 2), capability.clone(), Box::new(log.clone()));

    assert!(matches!(result, Err(ExperimentError::SetupFailed(_))));
    assert!(log.records().is_empty());
    assert_eq!(capability.call_count(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let config = ExperimentConfig {
        num_agents: 0,
        ..ab_config(1, 1)
    };
    let result = Experiment::new(
        config,
        Arc::new(ScriptedCapability::constant("A")),
        Box::new(MemoryEventLog::new()),
    );
    assert!(matches!(result, Err(ExperimentError::InvalidConfig(_))));
}

#[test]
fn test_parse_failures_are_counted_not_fatal() {
    let capability = Arc::new(ScriptedCapability::new(|req| {
        Ok(if req.agent_id == "agent_001" {
            DecisionOutput::text("no json here")
        } else {
            answer("A")
        })
    }));
    let log = MemoryEventLog::new();
    let mut experiment = Experiment::new(ab_config(4, 2), capability, Box::new(log.clone())).unwrap();
    let summary = experiment.run().unwrap();

    assert_eq!(summary.parse_failures_per_round.len(), summary.entropy_history.len());
    assert!(summary.parse_failures_per_round.iter().all(|&f| f == 1));
    assert_eq!(summary.parse_failures_total, summary.entropy_history.len());
}

#[test]
fn test_failing_capability_keeps_initial_stances() {
    // Surfaces the per-round failure-rate warnings with RUST_LOG=warn
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let capability = Arc::new(ScriptedCapability::new(|_| Ok(DecisionOutput::text("{\"stance\": "))));
    let config = ExperimentConfig {
        initial_stance_mode: InitialStanceMode::Enforced,
        ..ab_config(6, 3)
    };
    let mut experiment = Experiment::new(config, capability, Box::new(MemoryEventLog::new())).unwrap();
    let summary = experiment.run().unwrap();

    assert_eq!(summary.parse_failures_per_round, vec![6, 6, 6, 6]);
    let max_entropy = experiment.config().scenario.max_entropy();
    assert!(summary.entropy_history.iter().all(|&h| (h - max_entropy).abs() < 1e-12));
    assert_eq!(experiment.state().num_agents(), 6);
    assert_eq!(summary.termination, TerminationReason::Completed);
}

#[test]
fn test_cancel_before_run() {
    let token = CancellationToken::new();
    let mut experiment = Experiment::new(
        ab_config(4, 3),
        Arc::new(ScriptedCapability::constant("A")),
        Box::new(MemoryEventLog::new()),
    )
    .unwrap()
    .with_cancellation(token.clone());

    token.cancel();
    assert!(matches!(
        experiment.run(),
        Err(ExperimentError::Cancelled { completed_round: None })
    ));
}

#[test]
fn test_run_round_after_termination_errors() {
    let mut experiment = Experiment::new(
        ab_config(3, 0),
        Arc::new(ScriptedCapability::constant("A")),
        Box::new(MemoryEventLog::new()),
    )
    .unwrap();

    let round0 = experiment.run_round().unwrap();
    assert_eq!(round0.terminated, Some(TerminationReason::Completed));
    assert!(experiment.is_terminated());
    assert!(matches!(experiment.run_round(), Err(ExperimentError::Phase(_))));
}
