//! Deterministic stand-in capabilities
//!
//! NOTE: Available in all builds to support integration testing and dry
//! runs, but not meant to stand in for a real capability in experiments.

use super::{CapabilityError, DecisionCapability, DecisionOutput, DecisionRequest};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

type Responder = dyn Fn(&DecisionRequest) -> Result<DecisionOutput, CapabilityError> + Send + Sync;

/// Capability driven by a closure over the request
///
/// # Example
/// ```
/// use deliberation_core_rs::decision::{DecisionCapability, DecisionOutput, ScriptedCapability};
///
/// let capability = ScriptedCapability::new(|req| {
///     Ok(DecisionOutput::text(format!("round {}", req.round)))
/// });
/// assert!(capability.health_check().is_ok());
/// ```
pub struct ScriptedCapability {
    responder: Box<Responder>,
    health: Result<(), CapabilityError>,
    calls: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&DecisionRequest) -> Result<DecisionOutput, CapabilityError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            health: Ok(()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every request with the given stance (no reason given)
    pub fn constant(stance: impl Into<String>) -> Self {
        let stance = stance.into();
        Self::new(move |_| {
            Ok(DecisionOutput::structured(json!({
                "stance": stance,
                "rationale": format!("{} remains the right call.", stance),
                "changed": false,
                "change_reason": "NO_CHANGE",
            })))
        })
    }

    /// Make `health_check` fail with the given message
    pub fn unavailable(mut self, message: impl Into<String>) -> Self {
        self.health = Err(CapabilityError::Unavailable(message.into()));
        self
    }

    /// Number of `generate` calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DecisionCapability for ScriptedCapability {
    fn health_check(&self) -> Result<(), CapabilityError> {
        self.health.clone()
    }

    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(request)
    }
}

/// Picks `stances[seed % len]`: a pure function of the forwarded seed
pub struct SeededCapability {
    stances: Vec<String>,
}

impl SeededCapability {
    pub fn new<S: Into<String>>(stances: impl IntoIterator<Item = S>) -> Self {
        Self {
            stances: stances.into_iter().map(Into::into).collect(),
        }
    }
}

impl DecisionCapability for SeededCapability {
    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
        if self.stances.is_empty() {
            return Err(CapabilityError::RequestFailed("no stances configured".to_string()));
        }
        let stance = &self.stances[(request.seed % self.stances.len() as u64) as usize];
        Ok(DecisionOutput::structured(json!({
            "stance": stance,
            "rationale": format!("Seed {} favours {}.", request.seed, stance),
            "changed": false,
            "change_reason": "INFORMATIONAL",
        })))
    }
}
