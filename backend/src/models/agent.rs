//! Agent model
//!
//! One deliberating entity. Each agent has:
//! - a persona and a current stance + rationale
//! - an append-only, strictly round-ordered history of [`RoundRecord`]s
//!
//! # Step semantics
//!
//! `Agent::step` builds a request shaped by the active condition, calls the
//! decision capability with the agent's `llm` seed, and parses the answer:
//!
//! - the stance token is canonicalized and matched against the vocabulary;
//!   anything else keeps the previous stance
//! - the self-reported `changed` flag and change reason are recorded only
//! - the authoritative `changed` is ALWAYS `new_stance != previous_stance`
//!
//! CRITICAL: `current stance ∈ scenario.stances` at all times. No parse
//! path can produce a stance outside the vocabulary.

use crate::decision::{response_schema, CapabilityError, DecisionCapability, DecisionOutput, DecisionRequest};
use crate::exposure::{truncate_text, INDEPENDENT_CONTEXT};
use crate::metrics::StanceDistribution;
use crate::models::scenario::{ChangeReason, Condition, InitialStanceMode, Persona, Scenario, Stance};
use crate::peers::PeerView;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur when restoring an agent
#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("Agent {agent_id}: stance {stance} is not in the scenario vocabulary")]
    StanceOutsideVocabulary { agent_id: String, stance: String },

    #[error("Agent {agent_id}: history is not strictly round-ordered at round {round}")]
    HistoryOutOfOrder { agent_id: String, round: usize },
}

/// Text recorded as the change reason for every round-0 response
pub const INITIAL_REASON_TEXT: &str = "Independent initial judgment";

/// How a response was classified by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    /// Well-formed object with a stance from the vocabulary
    #[default]
    Parsed,
    /// No JSON object, or no string `stance` field
    Malformed,
    /// Well-formed, but the stance is not in the vocabulary
    ///
    /// Treated exactly like `Malformed`: the previous stance *and* its
    /// rationale are kept and the response counts as a parse failure. The
    /// new rationale argues for a stance the agent does not hold, so it is
    /// only kept in `raw_response`.
    InvalidStance,
    /// The capability returned an error instead of an answer
    CapabilityFailed,
}

impl ParseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Parsed)
    }
}

/// Checkpoint surface for one agent at a resume boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub stance: Stance,
    #[serde(default)]
    pub rationale: String,
}

/// Everything recorded about one agent in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub previous_stance: Stance,
    pub stance: Stance,
    pub rationale: String,
    /// Authoritative: `stance != previous_stance`
    pub changed: bool,
    /// What the agent claimed; never used for control flow
    pub changed_self_report: bool,
    pub change_reason: ChangeReason,
    #[serde(default)]
    pub change_reason_text: String,
    pub peer_sample_ids: Vec<String>,
    pub peer_seed: u64,
    pub llm_seed: u64,
    #[serde(default)]
    pub raw_response: String,
    /// False for every fallback outcome, including an out-of-vocabulary stance
    pub parse_success: bool,
    #[serde(default)]
    pub parse_outcome: ParseOutcome,
}

/// Read-only settings shared by every agent of an experiment
#[derive(Debug, Clone, Copy)]
pub struct DeliberationContext<'a> {
    pub scenario: &'a Scenario,
    pub condition: Condition,
    pub initial_stance_mode: InitialStanceMode,
    pub temperature: f64,
    pub peer_rationale_chars: usize,
    pub own_rationale_chars: usize,
}

/// Inputs for one agent in one round
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub round: usize,
    /// Already sampled and sorted by id; empty in round 0 and under C0
    pub peers: &'a [PeerView],
    pub llm_seed: u64,
    pub peer_seed: u64,
    /// Pre-round distribution, present only when the condition shows it
    pub global_stats: Option<&'a StanceDistribution>,
}

/// Result of parsing one capability answer, before change bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub stance: Stance,
    pub rationale: String,
    pub changed_self_report: bool,
    pub change_reason: ChangeReason,
    pub change_reason_text: String,
    pub raw_response: String,
    pub outcome: ParseOutcome,
}

/// Parse a capability answer against the scenario vocabulary
///
/// Any failure keeps `previous_stance` and `previous_rationale`, so the
/// returned stance is always in the vocabulary.
pub fn parse_decision(
    scenario: &Scenario,
    output: Result<DecisionOutput, CapabilityError>,
    previous_stance: &Stance,
    previous_rationale: &str,
) -> ParsedDecision {
    let fallback = |raw_response: String, outcome: ParseOutcome| ParsedDecision {
        stance: previous_stance.clone(),
        rationale: previous_rationale.to_string(),
        changed_self_report: false,
        change_reason: ChangeReason::NoChange,
        change_reason_text: String::new(),
        raw_response,
        outcome,
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => return fallback(e.to_string(), ParseOutcome::CapabilityFailed),
    };

    let object = match structured_object(&output) {
        Some(object) => object,
        None => return fallback(output.response, ParseOutcome::Malformed),
    };

    let Some(raw_stance) = object.get("stance").and_then(Value::as_str) else {
        return fallback(output.response, ParseOutcome::Malformed);
    };

    let changed_self_report = object.get("changed").and_then(Value::as_bool).unwrap_or(false);
    let change_reason = object
        .get("change_reason")
        .and_then(Value::as_str)
        .map(ChangeReason::parse_lenient)
        .unwrap_or_default();
    let change_reason_text = object
        .get("change_reason_text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match scenario.canonical_stance(raw_stance) {
        Some(stance) => ParsedDecision {
            stance: stance.clone(),
            rationale: object
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            changed_self_report,
            change_reason,
            change_reason_text,
            raw_response: output.response,
            outcome: ParseOutcome::Parsed,
        },
        None => ParsedDecision {
            changed_self_report,
            change_reason,
            change_reason_text,
            ..fallback(output.response, ParseOutcome::InvalidStance)
        },
    }
}

/// The capability's structured object, falling back to parsing the text
fn structured_object(output: &DecisionOutput) -> Option<serde_json::Map<String, Value>> {
    let value = match &output.parsed {
        Some(value) => value.clone(),
        None => serde_json::from_str::<Value>(output.response.trim()).ok()?,
    };
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// A deliberating agent
///
/// # Example
/// ```
/// use deliberation_core_rs::models::{Agent, Persona, Stance};
///
/// let agent = Agent::new("agent_000".to_string(), Persona::default(), Stance::new("A"));
/// assert_eq!(agent.stance(), &Stance::new("A"));
/// assert!(agent.history().is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: String,
    persona: Persona,
    stance: Stance,
    rationale: String,
    history: Vec<RoundRecord>,
}

impl Agent {
    pub fn new(id: String, persona: Persona, stance: Stance) -> Self {
        Self {
            id,
            persona,
            stance,
            rationale: String::new(),
            history: Vec::new(),
        }
    }

    /// Rebuild an agent at a resume boundary
    ///
    /// `history` must be strictly round-ordered; the checkpoint stance must
    /// be in the vocabulary.
    pub fn restore(
        id: String,
        persona: Persona,
        scenario: &Scenario,
        checkpoint: AgentCheckpoint,
        history: Vec<RoundRecord>,
    ) -> Result<Self, AgentError> {
        if !scenario.contains(&checkpoint.stance) {
            return Err(AgentError::StanceOutsideVocabulary {
                agent_id: id,
                stance: checkpoint.stance.to_string(),
            });
        }
        for pair in history.windows(2) {
            if pair[1].round <= pair[0].round {
                return Err(AgentError::HistoryOutOfOrder {
                    agent_id: id,
                    round: pair[1].round,
                });
            }
        }
        Ok(Self {
            id,
            persona,
            stance: checkpoint.stance,
            rationale: checkpoint.rationale,
            history,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn stance(&self) -> &Stance {
        &self.stance
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn checkpoint(&self) -> AgentCheckpoint {
        AgentCheckpoint {
            stance: self.stance.clone(),
            rationale: self.rationale.clone(),
        }
    }

    /// What peers see of this agent during the next round
    pub fn peer_view(&self) -> PeerView {
        PeerView {
            id: self.id.clone(),
            persona_name: self.persona.name.clone(),
            stance: self.stance.to_string(),
            rationale: self.rationale.clone(),
        }
    }

    pub fn build_system_prompt(&self, ctx: &DeliberationContext<'_>) -> String {
        let valid: Vec<&str> = ctx.scenario.stances.iter().map(Stance::as_str).collect();
        format!(
            "You are {}. {}\n\n\
             You are one of several participants deliberating over a shared scenario.\n\
             Valid positions: {}.\n\
             Reply with a JSON object with the fields \"stance\" (one of the valid positions), \
             \"rationale\" (your reasoning), \"changed\" (true if your position differs from \
             your previous one) and \"change_reason\" (one of NO_CHANGE, INFORMATIONAL, \
             NORMATIVE, UNCERTAINTY, INITIAL).",
            self.persona.name,
            self.persona.description,
            valid.join(", ")
        )
    }

    pub fn build_round_prompt(&self, ctx: &DeliberationContext<'_>, turn: &Turn<'_>) -> String {
        let previous = self.previous_stance_context(ctx, turn.round);
        let peers = if turn.round == 0 {
            INDEPENDENT_CONTEXT.to_string()
        } else {
            ctx.condition.exposure().render_peer_context(
                ctx.scenario,
                turn.peers,
                turn.global_stats,
                ctx.peer_rationale_chars,
            )
        };
        format!(
            "Scenario:\n{}\n\nRound {}.\n\n{}\n\n{}\n\nState your position for this round.",
            ctx.scenario.description, turn.round, previous, peers
        )
    }

    fn previous_stance_context(&self, ctx: &DeliberationContext<'_>, round: usize) -> String {
        if round == 0 {
            return match ctx.initial_stance_mode {
                InitialStanceMode::None => "This is your first look at the scenario. Think it through \
                     on your own and choose the position you find most defensible."
                    .to_string(),
                InitialStanceMode::Enforced => format!(
                    "You have been assigned the position {}. Explain it in your own words.",
                    self.stance
                ),
                InitialStanceMode::Soft => format!(
                    "You currently lean toward {}, but you may settle on another position \
                     if you find it more defensible.",
                    self.stance
                ),
            };
        }

        let rationale = if self.rationale.is_empty() {
            "No prior reasoning recorded.".to_string()
        } else {
            truncate_text(&self.rationale, ctx.own_rationale_chars)
        };
        format!(
            "In round {} you chose {}. Your reasoning was: \"{}\"",
            round - 1,
            self.stance,
            rationale
        )
    }

    pub fn build_request(&self, ctx: &DeliberationContext<'_>, turn: &Turn<'_>) -> DecisionRequest {
        DecisionRequest {
            prompt: self.build_round_prompt(ctx, turn),
            system_prompt: self.build_system_prompt(ctx),
            temperature: ctx.temperature,
            seed: turn.llm_seed,
            schema: response_schema(ctx.scenario.stances.iter().map(Stance::as_str)),
            agent_id: self.id.clone(),
            round: turn.round,
        }
    }

    /// Deliberate for one round and update state
    ///
    /// Never fails: a capability error or malformed answer is recorded as a
    /// parse failure and the previous stance is kept.
    pub fn step(
        &mut self,
        ctx: &DeliberationContext<'_>,
        capability: &dyn DecisionCapability,
        turn: &Turn<'_>,
    ) -> RoundRecord {
        let request = self.build_request(ctx, turn);
        let output = capability.generate(&request);
        if let Err(e) = &output {
            warn!(agent = %self.id, round = turn.round, error = %e, "decision capability failed");
        }

        let previous_stance = self.stance.clone();
        let parsed = parse_decision(ctx.scenario, output, &previous_stance, &self.rationale);
        if !parsed.outcome.is_success() {
            warn!(
                agent = %self.id,
                round = turn.round,
                outcome = ?parsed.outcome,
                "response not usable, keeping previous stance"
            );
        }

        let changed = parsed.stance != previous_stance;
        let (change_reason, change_reason_text) = if turn.round == 0 {
            (ChangeReason::Initial, INITIAL_REASON_TEXT.to_string())
        } else if changed && parsed.change_reason == ChangeReason::NoChange {
            (ChangeReason::Uncertainty, parsed.change_reason_text)
        } else {
            (parsed.change_reason, parsed.change_reason_text)
        };

        let record = RoundRecord {
            round: turn.round,
            previous_stance,
            stance: parsed.stance.clone(),
            rationale: parsed.rationale.clone(),
            changed,
            changed_self_report: parsed.changed_self_report,
            change_reason,
            change_reason_text,
            peer_sample_ids: turn.peers.iter().map(|p| p.id.clone()).collect(),
            peer_seed: turn.peer_seed,
            llm_seed: turn.llm_seed,
            raw_response: parsed.raw_response,
            parse_success: parsed.outcome.is_success(),
            parse_outcome: parsed.outcome,
        };

        self.stance = parsed.stance;
        self.rationale = parsed.rationale;
        self.history.push(record.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario() -> Scenario {
        Scenario::new("AB", "Pick A or B.", vec![Stance::new("A"), Stance::new("B")])
    }

    fn parse(output: Result<DecisionOutput, CapabilityError>) -> ParsedDecision {
        parse_decision(&scenario(), output, &Stance::new("A"), "old reasoning")
    }

    #[test]
    fn test_parse_valid_object() {
        let parsed = parse(Ok(DecisionOutput::structured(json!({
            "stance": " b ",
            "rationale": "B is kinder",
            "changed": true,
            "change_reason": "normative",
        }))));
        assert_eq!(parsed.stance, Stance::new("B"));
        assert_eq!(parsed.rationale, "B is kinder");
        assert!(parsed.changed_self_report);
        assert_eq!(parsed.change_reason, ChangeReason::Normative);
        assert_eq!(parsed.outcome, ParseOutcome::Parsed);
    }

    #[test]
    fn test_parse_falls_back_to_text_json() {
        let parsed = parse(Ok(DecisionOutput::text(r#" {"stance": "B", "rationale": "r"} "#)));
        assert_eq!(parsed.stance, Stance::new("B"));
        assert_eq!(parsed.outcome, ParseOutcome::Parsed);
    }

    #[test]
    fn test_parse_malformed_keeps_previous() {
        let parsed = parse(Ok(DecisionOutput::text("I choose B!")));
        assert_eq!(parsed.stance, Stance::new("A"));
        assert_eq!(parsed.rationale, "old reasoning");
        assert_eq!(parsed.outcome, ParseOutcome::Malformed);

        let no_stance = parse(Ok(DecisionOutput::structured(json!({"rationale": "x"}))));
        assert_eq!(no_stance.outcome, ParseOutcome::Malformed);
    }

    #[test]
    fn test_parse_invalid_stance_keeps_previous() {
        let parsed = parse(Ok(DecisionOutput::structured(json!({
            "stance": "C",
            "rationale": "C!",
            "change_reason": "INFORMATIONAL",
        }))));
        assert_eq!(parsed.stance, Stance::new("A"));
        assert_eq!(parsed.outcome, ParseOutcome::InvalidStance);
        assert_eq!(parsed.change_reason, ChangeReason::Informational);
    }

    #[test]
    fn test_parse_capability_error() {
        let parsed = parse(Err(CapabilityError::RequestFailed("timeout".into())));
        assert_eq!(parsed.stance, Stance::new("A"));
        assert_eq!(parsed.outcome, ParseOutcome::CapabilityFailed);
        assert!(parsed.raw_response.contains("timeout"));
    }

    #[test]
    fn test_restore_rejects_unknown_stance() {
        let result = Agent::restore(
            "agent_000".into(),
            Persona::default(),
            &scenario(),
            AgentCheckpoint {
                stance: Stance::new("Z"),
                rationale: String::new(),
            },
            Vec::new(),
        );
        assert!(matches!(result, Err(AgentError::StanceOutsideVocabulary { .. })));
    }

    #[test]
    fn test_round_prompt_mentions_previous_round() {
        let mut agent = Agent::new("agent_000".into(), Persona::default(), Stance::new("B"));
        agent.rationale = "y".repeat(500);
        let scenario = scenario();
        let ctx = DeliberationContext {
            scenario: &scenario,
            condition: Condition::C0Independent,
            initial_stance_mode: InitialStanceMode::None,
            temperature: 0.2,
            peer_rationale_chars: 200,
            own_rationale_chars: 300,
        };
        let turn = Turn {
            round: 3,
            peers: &[],
            llm_seed: 1,
            peer_seed: 2,
            global_stats: None,
        };
        let prompt = agent.build_round_prompt(&ctx, &turn);
        assert!(prompt.contains("In round 2 you chose B"));
        assert!(prompt.contains(INDEPENDENT_CONTEXT));
        assert!(!prompt.contains(&"y".repeat(298)));
    }
}
