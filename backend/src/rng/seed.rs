//! Stable seed derivation
//!
//! Every seed handed to the peer sampler or to the decision capability is
//! derived from `(run_seed, round, agent_id, purpose)` through SHA-256, so it
//! never depends on the runtime's default hasher, the platform, or the order
//! in which agents are processed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Independent randomness streams per (round, agent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPurpose {
    /// Controls which peers an agent sees
    Peer,
    /// Forwarded to the decision capability
    Llm,
}

impl SeedPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedPurpose::Peer => "peer",
            SeedPurpose::Llm => "llm",
        }
    }
}

impl fmt::Display for SeedPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a stable, non-negative seed
///
/// The key `"{run_seed}_{round}_{agent_id}_{purpose}"` is hashed with
/// SHA-256; the first 8 bytes (big-endian) masked to 63 bits form the seed,
/// so it always fits a non-negative signed 64-bit integer.
///
/// # Example
/// ```
/// use deliberation_core_rs::rng::{derive_seed, SeedPurpose};
///
/// let a = derive_seed(7, 3, "agent_001", SeedPurpose::Llm);
/// let b = derive_seed(7, 3, "agent_001", SeedPurpose::Llm);
/// assert_eq!(a, b);
/// assert_ne!(a, derive_seed(7, 3, "agent_001", SeedPurpose::Peer));
/// assert!(a <= i64::MAX as u64);
/// ```
pub fn derive_seed(run_seed: u64, round: usize, agent_id: &str, purpose: SeedPurpose) -> u64 {
    let key = format!("{}_{}_{}_{}", run_seed, round, agent_id, purpose);

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) & (i64::MAX as u64)
}

/// Both per-(round, agent) seeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSeeds {
    pub peer: u64,
    pub llm: u64,
}

impl AgentSeeds {
    pub fn derive(run_seed: u64, round: usize, agent_id: &str) -> Self {
        Self {
            peer: derive_seed(run_seed, round, agent_id, SeedPurpose::Peer),
            llm: derive_seed(run_seed, round, agent_id, SeedPurpose::Llm),
        }
    }
}
