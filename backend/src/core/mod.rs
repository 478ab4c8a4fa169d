//! Round progression

pub mod rounds;

pub use rounds::{Phase, PhaseError, RoundClock, TerminationReason};
