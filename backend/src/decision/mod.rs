//! Decision capability port
//!
//! The capability that actually produces an agent's answer (typically a
//! language model behind some client) is external and opaque. The core only
//! builds a [`DecisionRequest`], forwards the derived seed faithfully, and
//! parses whatever comes back.
//!
//! # Interface
//!
//! ```rust
//! use deliberation_core_rs::decision::{
//!     CapabilityError, DecisionCapability, DecisionOutput, DecisionRequest,
//! };
//!
//! struct AlwaysA;
//!
//! impl DecisionCapability for AlwaysA {
//!     fn generate(&self, _request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
//!         Ok(DecisionOutput::structured(serde_json::json!({
//!             "stance": "A",
//!             "rationale": "A is better",
//!             "changed": false,
//!             "change_reason": "NO_CHANGE",
//!         })))
//!     }
//! }
//! ```
//!
//! Implementations must be `Send + Sync`: in parallel execution mode several
//! agents of the same round call `generate` concurrently. The core never
//! retries a failed call; retry/backoff belongs inside the implementation.

mod scripted;

pub use scripted::{ScriptedCapability, SeededCapability};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors reported by a decision capability
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("Decision capability unavailable: {0}")]
    Unavailable(String),

    #[error("Decision request failed: {0}")]
    RequestFailed(String),
}

/// One call to the capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f64,
    /// The agent's derived `llm` seed
    pub seed: u64,
    /// JSON schema the structured answer should follow
    pub schema: Value,
    /// Routing metadata; not part of what the model sees
    pub agent_id: String,
    pub round: usize,
}

/// What the capability returned
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionOutput {
    /// Raw text as produced
    pub response: String,
    /// Structured object, when the capability already parsed one
    #[serde(default)]
    pub parsed: Option<Value>,
}

impl DecisionOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            parsed: None,
        }
    }

    pub fn structured(parsed: Value) -> Self {
        Self {
            response: parsed.to_string(),
            parsed: Some(parsed),
        }
    }
}

/// External decision-generation capability
pub trait DecisionCapability: Send + Sync {
    /// Probe used during experiment setup; an error aborts the run
    fn health_check(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError>;
}

impl<T: DecisionCapability + ?Sized> DecisionCapability for Box<T> {
    fn health_check(&self) -> Result<(), CapabilityError> {
        (**self).health_check()
    }

    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
        (**self).generate(request)
    }
}

impl<T: DecisionCapability + ?Sized> DecisionCapability for std::sync::Arc<T> {
    fn health_check(&self) -> Result<(), CapabilityError> {
        (**self).health_check()
    }

    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
        (**self).generate(request)
    }
}

/// JSON schema for an agent answer over the given stance vocabulary
pub fn response_schema<'a>(stances: impl IntoIterator<Item = &'a str>) -> Value {
    let stances: Vec<&str> = stances.into_iter().collect();
    json!({
        "type": "object",
        "properties": {
            "stance": { "type": "string", "enum": stances },
            "rationale": { "type": "string" },
            "changed": { "type": "boolean" },
            "change_reason": {
                "type": "string",
                "enum": ["NO_CHANGE", "INFORMATIONAL", "NORMATIVE", "UNCERTAINTY", "INITIAL"]
            }
        },
        "required": ["stance", "rationale", "changed", "change_reason"]
    })
}
