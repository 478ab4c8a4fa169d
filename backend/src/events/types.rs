//! Event log record types
//!
//! One record per JSONL line, tagged by `type`:
//!
//! ```text
//! config
//! round_start(0)  agent_response(0) × N  round_end(0)
//! round_start(1)  agent_response(1) × N  round_end(1)
//! ...
//! experiment_end
//! ```
//!
//! # Design Principles
//!
//! 1. **Append-only**: records are never rewritten except by recovery
//!    truncation, which only drops a tail
//! 2. **Self-describing**: every record carries its round (where relevant)
//! 3. **Deterministic**: no wall-clock fields, so identical runs produce
//!    identical logs

use crate::metrics::StanceDistribution;
use crate::models::agent::RoundRecord;
use crate::orchestrator::config::ExperimentConfig;
use crate::orchestrator::engine::ExperimentSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// First record of every log
    Config {
        experiment_id: String,
        /// SHA-256 of the canonical config JSON
        config_hash: String,
        config: ExperimentConfig,
    },

    RoundStart {
        round: usize,
        /// Distribution before any agent of this round has stepped
        distribution: StanceDistribution,
    },

    AgentResponse {
        round: usize,
        agent_id: String,
        response: RoundRecord,
    },

    RoundEnd {
        round: usize,
        distribution: StanceDistribution,
        entropy: f64,
        changes: usize,
        parse_failures: usize,
    },

    ExperimentEnd {
        summary: ExperimentSummary,
    },
}

impl LogRecord {
    /// Round this record belongs to, if any
    pub fn round(&self) -> Option<usize> {
        match self {
            LogRecord::RoundStart { round, .. } => Some(*round),
            LogRecord::AgentResponse { round, .. } => Some(*round),
            LogRecord::RoundEnd { round, .. } => Some(*round),
            LogRecord::Config { .. } | LogRecord::ExperimentEnd { .. } => None,
        }
    }

    /// Value of the `type` tag
    pub fn record_type(&self) -> &'static str {
        match self {
            LogRecord::Config { .. } => "config",
            LogRecord::RoundStart { .. } => "round_start",
            LogRecord::AgentResponse { .. } => "agent_response",
            LogRecord::RoundEnd { .. } => "round_end",
            LogRecord::ExperimentEnd { .. } => "experiment_end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scenario::{Scenario, Stance};

    #[test]
    fn test_round_end_json_shape() {
        let scenario = Scenario::new("AB", "d", vec![Stance::new("A"), Stance::new("B")]);
        let a = Stance::new("A");
        let record = LogRecord::RoundEnd {
            round: 2,
            distribution: StanceDistribution::from_stances(&scenario, [&a]),
            entropy: 0.0,
            changes: 1,
            parse_failures: 0,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "round_end");
        assert_eq!(json["round"], 2);
        assert_eq!(json["distribution"]["A"], 1);

        let back: LogRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.round(), Some(2));
        assert_eq!(back.record_type(), "round_end");
    }
}
