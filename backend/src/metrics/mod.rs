//! Population-level measurements
//!
//! - **StanceDistribution**: stance → count over the whole population
//! - **Entropy**: base-2 Shannon entropy of a distribution
//! - **Time-to-collapse**: first round from which entropy stays below the
//!   consensus threshold

use crate::models::scenario::{Scenario, Stance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entropy below which a round triggers early termination
pub const EARLY_STOP_ENTROPY: f64 = 0.1;

/// Entropy of roughly a 90/10 two-way split; used for time-to-collapse
pub const CONSENSUS_ENTROPY: f64 = 0.469;

/// Stance counts for one moment of the experiment
///
/// Every vocabulary stance is present (zero counts included) so that two
/// distributions over the same scenario always have the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StanceDistribution {
    counts: BTreeMap<Stance, usize>,
}

impl StanceDistribution {
    /// Zero counts for every stance in the vocabulary
    pub fn empty(scenario: &Scenario) -> Self {
        Self {
            counts: scenario.stances.iter().map(|s| (s.clone(), 0)).collect(),
        }
    }

    pub fn from_stances<'a>(scenario: &Scenario, stances: impl IntoIterator<Item = &'a Stance>) -> Self {
        let mut dist = Self::empty(scenario);
        for stance in stances {
            dist.add(stance);
        }
        dist
    }

    pub fn add(&mut self, stance: &Stance) {
        *self.counts.entry(stance.clone()).or_insert(0) += 1;
    }

    pub fn count(&self, stance: &Stance) -> usize {
        self.counts.get(stance).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stance, usize)> {
        self.counts.iter().map(|(s, c)| (s, *c))
    }

    /// Shannon entropy (bits) of this distribution
    pub fn entropy(&self) -> f64 {
        shannon_entropy(self.counts.values().copied())
    }

    /// `"A: 9 vs B: 1"` in the scenario's vocabulary order
    pub fn display_in(&self, scenario: &Scenario) -> String {
        scenario
            .stances
            .iter()
            .map(|s| format!("{}: {}", s, self.count(s)))
            .collect::<Vec<_>>()
            .join(" vs ")
    }
}

/// `H = -Σ p_i·log2(p_i)` over nonzero counts, `p_i = count_i / total`
///
/// Returns 0.0 for an empty population.
///
/// # Example
/// ```
/// use deliberation_core_rs::metrics::shannon_entropy;
///
/// assert!((shannon_entropy([5, 5]) - 1.0).abs() < 1e-12);
/// assert_eq!(shannon_entropy([10, 0]), 0.0);
/// ```
pub fn shannon_entropy(counts: impl IntoIterator<Item = usize>) -> f64 {
    let counts: Vec<usize> = counts.into_iter().filter(|&c| c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    // A single nonzero bucket yields -1·log2(1) = -0.0
    h.max(0.0)
}

/// First index `i` such that every entry from `i` onward is below `threshold`
///
/// Index 0 is the round-0 state, so the result is a round number.
///
/// # Example
/// ```
/// use deliberation_core_rs::metrics::{time_to_collapse, CONSENSUS_ENTROPY};
///
/// assert_eq!(time_to_collapse(&[1.0, 0.4689, 0.0], CONSENSUS_ENTROPY), Some(1));
/// assert_eq!(time_to_collapse(&[1.0, 0.2, 0.8], CONSENSUS_ENTROPY), None);
/// ```
pub fn time_to_collapse(history: &[f64], threshold: f64) -> Option<usize> {
    let mut first_sustained = None;
    for (i, &h) in history.iter().enumerate() {
        if h < threshold {
            first_sustained.get_or_insert(i);
        } else {
            first_sustained = None;
        }
    }
    first_sustained
}
