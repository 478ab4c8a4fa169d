//! Round progression for an experiment
//!
//! The simulation advances in synchronized rounds:
//!
//! ```text
//! Setup ─▶ InitialThinking (round 0) ─▶ Deliberation(1) ─▶ ... ─▶ Deliberation(N)
//!                                              │                        │
//!                                              └──── Terminated ◀───────┘
//! ```
//!
//! A resumed run skips round 0 and enters `Deliberation(r + 1)` directly.
//! A round that fails part-way leaves the clock `Interrupted`; the only way
//! forward from there is recovery from the event log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PhaseError {
    #[error("Cannot start round {requested} while in phase {current:?}")]
    OutOfOrder { requested: usize, current: Phase },

    #[error("Round {requested} exceeds configured num_rounds {num_rounds}")]
    PastLastRound { requested: usize, num_rounds: usize },

    #[error("Round {round} was interrupted part-way; resume from the event log")]
    Interrupted { round: usize },
}

/// Why the experiment stopped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// All configured rounds ran
    Completed,
    /// Entropy dropped below the early-stop threshold after `round`
    Converged { round: usize, entropy: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Setup,
    InitialThinking,
    Deliberation { round: usize },
    /// `round` started but never closed; agents may be partly stepped
    Interrupted { round: usize },
    Terminated(TerminationReason),
}

/// Tracks the current phase and enforces the round barrier
///
/// # Example
/// ```
/// use deliberation_core_rs::core::rounds::{Phase, RoundClock};
///
/// let mut clock = RoundClock::new(3);
/// clock.begin_round(0).unwrap();
/// assert_eq!(clock.phase(), Phase::InitialThinking);
/// assert_eq!(clock.next_round(), Some(1));
/// assert!(clock.begin_round(2).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RoundClock {
    phase: Phase,
    num_rounds: usize,
    resumed_from: Option<usize>,
}

impl RoundClock {
    pub fn new(num_rounds: usize) -> Self {
        Self {
            phase: Phase::Setup,
            num_rounds,
            resumed_from: None,
        }
    }

    /// Clock positioned just after `last_complete_round`
    pub fn resumed(num_rounds: usize, last_complete_round: usize) -> Self {
        let phase = if last_complete_round == 0 {
            Phase::InitialThinking
        } else {
            Phase::Deliberation {
                round: last_complete_round,
            }
        };
        Self {
            phase,
            num_rounds,
            resumed_from: Some(last_complete_round),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn num_rounds(&self) -> usize {
        self.num_rounds
    }

    pub fn resumed_from(&self) -> Option<usize> {
        self.resumed_from
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    /// The round that may start next, if any
    pub fn next_round(&self) -> Option<usize> {
        let next = match self.phase {
            Phase::Setup => 0,
            Phase::InitialThinking => 1,
            Phase::Deliberation { round } => round + 1,
            Phase::Interrupted { .. } | Phase::Terminated(_) => return None,
        };
        (next <= self.num_rounds).then_some(next)
    }

    pub fn begin_round(&mut self, round: usize) -> Result<(), PhaseError> {
        if let Phase::Interrupted { round } = self.phase {
            return Err(PhaseError::Interrupted { round });
        }
        if round > self.num_rounds {
            return Err(PhaseError::PastLastRound {
                requested: round,
                num_rounds: self.num_rounds,
            });
        }
        if self.next_round() != Some(round) {
            return Err(PhaseError::OutOfOrder {
                requested: round,
                current: self.phase,
            });
        }
        self.phase = if round == 0 {
            Phase::InitialThinking
        } else {
            Phase::Deliberation { round }
        };
        Ok(())
    }

    pub fn terminate(&mut self, reason: TerminationReason) {
        self.phase = Phase::Terminated(reason);
    }

    /// Mark the current round as abandoned part-way
    pub fn interrupt(&mut self) {
        let round = match self.phase {
            Phase::InitialThinking => 0,
            Phase::Deliberation { round } => round,
            _ => return,
        };
        self.phase = Phase::Interrupted { round };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_progression() {
        let mut clock = RoundClock::new(2);
        for round in 0..=2 {
            clock.begin_round(round).unwrap();
        }
        assert_eq!(clock.next_round(), None);
        clock.terminate(TerminationReason::Completed);
        assert!(clock.is_terminated());
    }

    #[test]
    fn test_resumed_skips_round_zero() {
        let clock = RoundClock::resumed(5, 3);
        assert_eq!(clock.next_round(), Some(4));
        assert_eq!(clock.resumed_from(), Some(3));
    }

    #[test]
    fn test_interrupted_round_blocks_progress() {
        let mut clock = RoundClock::new(4);
        clock.begin_round(0).unwrap();
        clock.begin_round(1).unwrap();
        clock.interrupt();

        assert_eq!(clock.phase(), Phase::Interrupted { round: 1 });
        assert_eq!(clock.next_round(), None);
        assert!(!clock.is_terminated());
        assert_eq!(clock.begin_round(2), Err(PhaseError::Interrupted { round: 1 }));
    }

    #[test]
    fn test_interrupt_outside_a_round_is_ignored() {
        let mut clock = RoundClock::new(1);
        clock.interrupt();
        assert_eq!(clock.phase(), Phase::Setup);
    }

    #[test]
    fn test_past_last_round_rejected() {
        let mut clock = RoundClock::resumed(3, 3);
        assert_eq!(clock.next_round(), None);
        assert_eq!(
            clock.begin_round(4),
            Err(PhaseError::PastLastRound {
                requested: 4,
                num_rounds: 3
            })
        );
    }
}
