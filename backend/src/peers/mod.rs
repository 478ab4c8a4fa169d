//! Peer sampling
//!
//! Each round an agent sees up to `k` other agents' previous-round positions.
//! Selection is seeded by the agent's `peer` seed and is independent of the
//! order in which the population happens to be stored:
//!
//! 1. candidates = population minus the requester, sorted by id
//! 2. partial Fisher–Yates draw of `min(k, n-1)` candidates
//! 3. the draw is sorted by id before it is shown to the agent

use crate::rng::RngManager;
use serde::{Deserialize, Serialize};

/// Frozen view of one agent's position at the start of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerView {
    pub id: String,
    pub persona_name: String,
    pub stance: String,
    pub rationale: String,
}

/// Deterministic, duplicate-free selection of peers for `requester`
///
/// # Example
/// ```
/// use deliberation_core_rs::peers::{sample_peers, PeerView};
///
/// let population: Vec<PeerView> = (0..5)
///     .map(|i| PeerView {
///         id: format!("agent_{:03}", i),
///         persona_name: "P".to_string(),
///         stance: "A".to_string(),
///         rationale: String::new(),
///     })
///     .collect();
///
/// let peers = sample_peers(&population, "agent_002", 3, 42);
/// assert_eq!(peers.len(), 3);
/// assert!(peers.iter().all(|p| p.id != "agent_002"));
/// ```
pub fn sample_peers(population: &[PeerView], requester: &str, k: usize, seed: u64) -> Vec<PeerView> {
    let mut candidates: Vec<&PeerView> = population.iter().filter(|p| p.id != requester).collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    candidates.dedup_by(|a, b| a.id == b.id);

    let take = k.min(candidates.len());
    if take == 0 {
        return Vec::new();
    }

    let mut rng = RngManager::new(seed);
    for i in 0..take {
        let j = i + rng.index(candidates.len() - i);
        candidates.swap(i, j);
    }

    let mut chosen: Vec<PeerView> = candidates[..take].iter().map(|p| (*p).clone()).collect();
    chosen.sort_by(|a, b| a.id.cmp(&b.id));
    chosen
}
