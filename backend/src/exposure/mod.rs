//! Information exposure per condition
//!
//! The five conditions differ only in what an agent sees about its peers.
//! That difference lives in one table, [`EXPOSURE_TABLE`], indexed by
//! [`Condition::index`]; everything else (agent prompts, stats visibility in
//! the orchestrator) reads from it.
//!
//! | Condition | Peer identity | Peer rationale | Aggregate stats |
//! |-----------|---------------|----------------|-----------------|
//! | C0        | none          | none           | none            |
//! | C1        | shown         | shown          | shown           |
//! | C2        | shown         | hidden         | shown           |
//! | C3        | anonymized    | shown          | shown           |
//! | C4        | anonymized    | shown          | hidden          |

use crate::metrics::StanceDistribution;
use crate::models::scenario::{Condition, Scenario};
use crate::peers::PeerView;

/// Marker appended to truncated text; counted inside the budget
pub const ELLIPSIS: &str = "...";

/// Peer section used whenever an agent deliberates alone (C0, round 0)
pub const INDEPENDENT_CONTEXT: &str =
    "You are deliberating independently this round. You do not see anyone else's position.";

/// How peers are identified in the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerIdentity {
    /// No peer block at all
    Hidden,
    /// Agent id and persona name
    Shown,
    /// "Participant N" in display order
    Anonymized,
}

/// Formatting strategy for one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureStrategy {
    pub condition: Condition,
    pub identity: PeerIdentity,
    pub rationale: bool,
    pub aggregate_stats: bool,
}

pub const EXPOSURE_TABLE: [ExposureStrategy; 5] = [
    ExposureStrategy {
        condition: Condition::C0Independent,
        identity: PeerIdentity::Hidden,
        rationale: false,
        aggregate_stats: false,
    },
    ExposureStrategy {
        condition: Condition::C1Full,
        identity: PeerIdentity::Shown,
        rationale: true,
        aggregate_stats: true,
    },
    ExposureStrategy {
        condition: Condition::C2StanceOnly,
        identity: PeerIdentity::Shown,
        rationale: false,
        aggregate_stats: true,
    },
    ExposureStrategy {
        condition: Condition::C3AnonBandwagon,
        identity: PeerIdentity::Anonymized,
        rationale: true,
        aggregate_stats: true,
    },
    ExposureStrategy {
        condition: Condition::C4PureInfo,
        identity: PeerIdentity::Anonymized,
        rationale: true,
        aggregate_stats: false,
    },
];

impl Condition {
    pub fn exposure(&self) -> &'static ExposureStrategy {
        &EXPOSURE_TABLE[self.index()]
    }
}

impl ExposureStrategy {
    /// Whether any peer information reaches the agent
    pub fn shows_peers(&self) -> bool {
        self.identity != PeerIdentity::Hidden
    }

    /// Render the peer section of a round prompt
    ///
    /// `stats` is only rendered when this strategy shows aggregate stats and
    /// the caller actually supplied a distribution.
    pub fn render_peer_context(
        &self,
        scenario: &Scenario,
        peers: &[PeerView],
        stats: Option<&StanceDistribution>,
        rationale_chars: usize,
    ) -> String {
        if !self.shows_peers() {
            return INDEPENDENT_CONTEXT.to_string();
        }

        let lines: Vec<String> = peers
            .iter()
            .enumerate()
            .map(|(i, peer)| self.render_peer(i + 1, peer, rationale_chars))
            .collect();

        let peer_block = if lines.is_empty() {
            "You see no other participants' positions this round.".to_string()
        } else {
            format!(
                "You see the positions of {} other participants:\n{}",
                lines.len(),
                lines.join("\n")
            )
        };

        match stats.filter(|_| self.aggregate_stats) {
            Some(dist) => format!(
                "Current group distribution: {}\n\n{}",
                dist.display_in(scenario),
                peer_block
            ),
            None => peer_block,
        }
    }

    fn render_peer(&self, index: usize, peer: &PeerView, rationale_chars: usize) -> String {
        let who = match self.identity {
            PeerIdentity::Shown => format!("{} ({})", peer.id, peer.persona_name),
            _ => format!("Participant {}", index),
        };
        if self.rationale {
            format!(
                "- {}: {}. Reasoning: \"{}\"",
                who,
                peer.stance,
                truncate_text(&peer.rationale, rationale_chars)
            )
        } else {
            format!("- {}: {}", who, peer.stance)
        }
    }
}

/// Cap `text` at `max_chars` characters, ending in [`ELLIPSIS`] when cut
///
/// # Example
/// ```
/// use deliberation_core_rs::exposure::truncate_text;
///
/// assert_eq!(truncate_text("short", 10), "short");
/// assert_eq!(truncate_text("abcdefghij", 8), "abcde...");
/// ```
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker = ELLIPSIS.chars().count();
    if max_chars <= marker {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - marker).collect();
    out.push_str(ELLIPSIS);
    out
}
