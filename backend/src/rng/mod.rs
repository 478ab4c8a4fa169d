//! Deterministic random number generation
//!
//! CRITICAL: All randomness in the simulator MUST go through this module.
//! - `xorshift`: the seeded generator owned by an experiment
//! - `seed`: SHA-256 based per-(round, agent, purpose) seed derivation

mod seed;
mod xorshift;

pub use seed::{derive_seed, AgentSeeds, SeedPurpose};
pub use xorshift::RngManager;
