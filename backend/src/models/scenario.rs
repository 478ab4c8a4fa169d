//! Scenario vocabulary and experiment-level enums
//!
//! A scenario fixes the stance vocabulary for a run. Every stance an agent
//! ever holds is one of `Scenario::stances`; nothing else is representable
//! once a token has gone through [`Scenario::canonical_stance`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while validating a scenario
#[derive(Debug, Error, PartialEq)]
pub enum ScenarioError {
    #[error("Scenario {scenario_id} has no stances")]
    EmptyVocabulary { scenario_id: String },

    #[error("Scenario {scenario_id} lists stance {stance} more than once")]
    DuplicateStance { scenario_id: String, stance: String },

    #[error("Scenario {scenario_id} has an empty stance token")]
    BlankStance { scenario_id: String },

    #[error("Initial bias must be within [0, 1], got {bias}")]
    BiasOutOfRange { bias: f64 },
}

/// A stance token from a scenario's vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stance(String);

impl Stance {
    pub fn new(token: impl Into<String>) -> Self {
        Stance(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Stance {
    fn from(token: &str) -> Self {
        Stance::new(token)
    }
}

/// Normalize free text into stance-token shape
///
/// Trims, uppercases, and collapses runs of whitespace/hyphens into `_`:
/// `" pull the-lever "` → `"PULL_THE_LEVER"`.
pub fn canonicalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(ch.to_uppercase());
    }
    out
}

/// Discrete-choice scenario under deliberation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub description: String,
    /// Ordered vocabulary; the first two are the "primary" stances used by
    /// the balanced initial split and the initial bias
    pub stances: Vec<Stance>,
    /// Probability that an organically sampled initial stance is `stances[0]`
    #[serde(default)]
    pub initial_bias: Option<f64>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, description: impl Into<String>, stances: Vec<Stance>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            stances,
            initial_bias: None,
        }
    }

    pub fn with_initial_bias(mut self, bias: f64) -> Self {
        self.initial_bias = Some(bias);
        self
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.stances.is_empty() {
            return Err(ScenarioError::EmptyVocabulary {
                scenario_id: self.id.clone(),
            });
        }
        for (i, stance) in self.stances.iter().enumerate() {
            if stance.as_str().trim().is_empty() {
                return Err(ScenarioError::BlankStance {
                    scenario_id: self.id.clone(),
                });
            }
            if self.stances[..i].contains(stance) {
                return Err(ScenarioError::DuplicateStance {
                    scenario_id: self.id.clone(),
                    stance: stance.to_string(),
                });
            }
        }
        if let Some(bias) = self.initial_bias {
            if !(0.0..=1.0).contains(&bias) {
                return Err(ScenarioError::BiasOutOfRange { bias });
            }
        }
        Ok(())
    }

    pub fn contains(&self, stance: &Stance) -> bool {
        self.stances.contains(stance)
    }

    /// Match free text against the vocabulary after canonicalization
    ///
    /// Vocabulary entries are canonicalized the same way, so a scenario may
    /// declare `"pull lever"` and still match `"PULL_LEVER"`.
    pub fn canonical_stance(&self, raw: &str) -> Option<&Stance> {
        let wanted = canonicalize_token(raw);
        if wanted.is_empty() {
            return None;
        }
        self.stances
            .iter()
            .find(|s| canonicalize_token(s.as_str()) == wanted)
    }

    pub fn max_entropy(&self) -> f64 {
        (self.stances.len() as f64).log2()
    }
}

/// Persona assigned to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Persona::new(
            "Deliberator",
            "A thoughtful participant who weighs the arguments on their merits.",
        )
    }
}

/// Information-exposure topology
///
/// What each condition shows is defined once, in [`crate::exposure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "C0_INDEPENDENT")]
    C0Independent,
    #[serde(rename = "C1_FULL")]
    C1Full,
    #[serde(rename = "C2_STANCE_ONLY")]
    C2StanceOnly,
    #[serde(rename = "C3_ANON_BANDWAGON")]
    C3AnonBandwagon,
    #[serde(rename = "C4_PURE_INFO")]
    C4PureInfo,
}

impl Condition {
    pub const ALL: [Condition; 5] = [
        Condition::C0Independent,
        Condition::C1Full,
        Condition::C2StanceOnly,
        Condition::C3AnonBandwagon,
        Condition::C4PureInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::C0Independent => "C0_INDEPENDENT",
            Condition::C1Full => "C1_FULL",
            Condition::C2StanceOnly => "C2_STANCE_ONLY",
            Condition::C3AnonBandwagon => "C3_ANON_BANDWAGON",
            Condition::C4PureInfo => "C4_PURE_INFO",
        }
    }

    /// Position in [`Condition::ALL`] (and in the exposure table)
    pub fn index(&self) -> usize {
        match self {
            Condition::C0Independent => 0,
            Condition::C1Full => 1,
            Condition::C2StanceOnly => 2,
            Condition::C3AnonBandwagon => 3,
            Condition::C4PureInfo => 4,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How round-0 stances are seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialStanceMode {
    /// Organic sampling from the scenario's bias (or uniform)
    #[default]
    None,
    /// Balanced split, framed as a position the agent must hold
    Enforced,
    /// Balanced split, framed as a leaning the agent may revise
    Soft,
}

impl InitialStanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitialStanceMode::None => "NONE",
            InitialStanceMode::Enforced => "ENFORCED",
            InitialStanceMode::Soft => "SOFT",
        }
    }

    pub fn uses_balanced_split(&self) -> bool {
        !matches!(self, InitialStanceMode::None)
    }
}

/// Why an agent says it changed (or kept) its stance
///
/// Parsed from free text for logging only; never drives control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReason {
    #[default]
    NoChange,
    Informational,
    Normative,
    Uncertainty,
    Initial,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::NoChange => "NO_CHANGE",
            ChangeReason::Informational => "INFORMATIONAL",
            ChangeReason::Normative => "NORMATIVE",
            ChangeReason::Uncertainty => "UNCERTAINTY",
            ChangeReason::Initial => "INITIAL",
        }
    }

    /// Parse a reason tag; anything unrecognized is `NoChange`
    pub fn parse_lenient(raw: &str) -> ChangeReason {
        match canonicalize_token(raw).as_str() {
            "INFORMATIONAL" => ChangeReason::Informational,
            "NORMATIVE" => ChangeReason::Normative,
            "UNCERTAINTY" => ChangeReason::Uncertainty,
            "INITIAL" => ChangeReason::Initial,
            _ => ChangeReason::NoChange,
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
