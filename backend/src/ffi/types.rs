//! Type conversion utilities for FFI boundary
//!
//! Converts between Rust types and PyO3-compatible types.

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::decision::{CapabilityError, DecisionCapability, DecisionOutput, DecisionRequest};
use crate::orchestrator::{ExperimentConfig, ExperimentError, RoundResult};

// ========================================================================
// Error Mapping
// ========================================================================

pub fn value_error(message: impl Into<String>) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(message.into())
}

pub fn runtime_error(context: &str, error: ExperimentError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}: {}", context, error))
}

// ========================================================================
// Config Parsing
// ========================================================================

/// Parse a config from a JSON string or a dict
///
/// Dicts go through Python's `json.dumps` so the same serde defaults apply
/// to both forms.
pub fn parse_experiment_config(config: &Bound<'_, PyAny>) -> PyResult<ExperimentConfig> {
    let json: String = if let Ok(text) = config.extract::<String>() {
        text
    } else if config.is_instance_of::<PyDict>() {
        config
            .py()
            .import("json")?
            .call_method1("dumps", (config,))?
            .extract()?
    } else {
        return Err(value_error("config must be a JSON string or a dict"));
    };

    let parsed = ExperimentConfig::from_json_str(&json).map_err(|e| value_error(e.to_string()))?;
    parsed.validate().map_err(|e| value_error(e.to_string()))?;
    Ok(parsed)
}

// ========================================================================
// Result Conversion
// ========================================================================

pub fn round_result_to_py(py: Python<'_>, result: &RoundResult) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new(py);

    dict.set_item("round", result.round)?;
    dict.set_item("entropy", result.entropy)?;
    dict.set_item("changes", result.changes)?;
    dict.set_item("parse_failures", result.parse_failures)?;

    let distribution = PyDict::new(py);
    for (stance, count) in result.distribution.iter() {
        distribution.set_item(stance.as_str(), count)?;
    }
    dict.set_item("distribution", distribution)?;

    let terminated = result
        .terminated
        .map(|reason| serde_json::to_string(&reason))
        .transpose()
        .map_err(|e| value_error(e.to_string()))?;
    dict.set_item("terminated", terminated)?;

    Ok(dict.unbind())
}

// ========================================================================
// Python Decision Capability
// ========================================================================

/// Decision capability backed by a Python callable
///
/// The callable receives the request as a JSON string and returns the
/// answer text; raising an exception counts as a failed request.
pub struct PyCapability {
    callback: PyObject,
}

impl PyCapability {
    pub fn new(callback: PyObject) -> Self {
        Self { callback }
    }
}

impl DecisionCapability for PyCapability {
    fn health_check(&self) -> Result<(), CapabilityError> {
        Python::with_gil(|py| {
            if self.callback.bind(py).is_callable() {
                Ok(())
            } else {
                Err(CapabilityError::Unavailable(
                    "decision capability is not callable".to_string(),
                ))
            }
        })
    }

    fn generate(&self, request: &DecisionRequest) -> Result<DecisionOutput, CapabilityError> {
        let payload =
            serde_json::to_string(request).map_err(|e| CapabilityError::RequestFailed(e.to_string()))?;
        Python::with_gil(|py| {
            self.callback
                .call1(py, (payload,))
                .and_then(|answer| answer.extract::<String>(py))
                .map(DecisionOutput::text)
                .map_err(|e| CapabilityError::RequestFailed(e.to_string()))
        })
    }
}
