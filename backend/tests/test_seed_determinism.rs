//! Determinism tests
//!
//! Same config + deterministic capability must give byte-identical logs,
//! and seed derivation must keep its purposes apart.

use deliberation_core_rs::decision::{DecisionOutput, ScriptedCapability, SeededCapability};
use deliberation_core_rs::metrics::shannon_entropy;
use deliberation_core_rs::models::{Condition, Scenario, Stance};
use deliberation_core_rs::orchestrator::{Experiment, ExperimentConfig};
use deliberation_core_rs::rng::{derive_seed, AgentSeeds, SeedPurpose};
use deliberation_core_rs::MemoryEventLog;
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn config(condition: Condition, seed: u64) -> ExperimentConfig {
    let scenario = Scenario::new(
        "lifeboat",
        "Who gets the last seat?",
        vec![Stance::new("CHILD"), Stance::new("DOCTOR"), Stance::new("LOTTERY")],
    );
    ExperimentConfig {
        num_agents: 12,
        num_rounds: 4,
        sample_k: 3,
        seed,
        condition,
        ..ExperimentConfig::new(scenario)
    }
}

fn run_to_jsonl(config: ExperimentConfig) -> String {
    let log = MemoryEventLog::new();
    let capability = Arc::new(SeededCapability::new(["CHILD", "DOCTOR", "LOTTERY"]));
    let mut experiment = Experiment::new(config, capability, Box::new(log.clone())).unwrap();
    experiment.run().unwrap();
    log.to_jsonl().unwrap()
}

#[test]
fn test_identical_runs_produce_identical_logs() {
    for condition in Condition::ALL {
        let first = run_to_jsonl(config(condition, 99));
        let second = run_to_jsonl(config(condition, 99));
        assert_eq!(first, second, "log differs between runs under {}", condition);
    }
}

#[test]
fn test_different_run_seed_changes_log() {
    assert_ne!(
        run_to_jsonl(config(Condition::C1Full, 1)),
        run_to_jsonl(config(Condition::C1Full, 2))
    );
}

#[test]
fn test_capability_receives_derived_llm_seed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let capability = ScriptedCapability::new(move |req| {
        recorder
            .lock()
            .unwrap()
            .push((req.agent_id.clone(), req.round, req.seed));
        Ok(DecisionOutput::structured(json!({"stance": "CHILD", "rationale": "r"})))
    });

    let config = ExperimentConfig {
        num_rounds: 2,
        ..config(Condition::C2StanceOnly, 17)
    };
    let mut experiment = Experiment::new(config, Arc::new(capability), Box::new(MemoryEventLog::new())).unwrap();
    experiment.run().unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for (agent_id, round, seed) in seen.iter() {
        assert_eq!(*seed, derive_seed(17, *round, agent_id, SeedPurpose::Llm));
    }
}

#[test]
fn test_agent_seeds_match_free_function() {
    let seeds = AgentSeeds::derive(5, 3, "agent_007");
    assert_eq!(seeds.peer, derive_seed(5, 3, "agent_007", SeedPurpose::Peer));
    assert_eq!(seeds.llm, derive_seed(5, 3, "agent_007", SeedPurpose::Llm));
}

proptest! {
    #[test]
    fn prop_seed_separation(run_seed in any::<u64>(), round in 0usize..50, agent in 0usize..100) {
        let id = format!("agent_{:03}", agent);
        let peer = derive_seed(run_seed, round, &id, SeedPurpose::Peer);
        let llm = derive_seed(run_seed, round, &id, SeedPurpose::Llm);
        prop_assert_ne!(peer, llm);
        prop_assert!(peer < (1u64 << 63));
        prop_assert!(llm < (1u64 << 63));
    }

    #[test]
    fn prop_seed_differs_across_rounds(run_seed in any::<u64>(), round in 0usize..50) {
        let a = derive_seed(run_seed, round, "agent_000", SeedPurpose::Llm);
        let b = derive_seed(run_seed, round + 1, "agent_000", SeedPurpose::Llm);
        prop_assert_ne!(a, b);
    }

    #[test]
    fn prop_entropy_bounds(counts in proptest::collection::vec(0usize..50, 1..8)) {
        let h = shannon_entropy(counts.iter().copied());
        let nonzero = counts.iter().filter(|&&c| c > 0).count();
        prop_assert!(h >= 0.0);
        if nonzero > 0 {
            prop_assert!(h <= (nonzero as f64).log2() + 1e-9);
        }
        if nonzero <= 1 {
            prop_assert_eq!(h, 0.0);
        }
    }
}
