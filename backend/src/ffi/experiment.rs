//! PyO3 wrapper for Experiment
//!
//! This module provides the Python interface to the Rust experiment engine.

use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::sync::{Arc, Mutex};

use super::types::{parse_experiment_config, round_result_to_py, runtime_error, value_error, PyCapability};
use crate::events::JsonlEventLog;
use crate::orchestrator::{
    prepare_resume as rust_prepare_resume, CancellationToken, Experiment as RustExperiment, ResumeDecision,
};

/// Python wrapper for Rust Experiment
///
/// # Example (from Python)
///
/// ```python
/// from deliberation_core_rs import Experiment
///
/// def decide(request_json: str) -> str:
///     return '{"stance": "A", "rationale": "...", "changed": false}'
///
/// exp = Experiment({"scenario": {...}, "condition": "C1_FULL"}, decide, "run.jsonl")
/// summary = exp.run()
/// ```
#[pyclass(name = "Experiment")]
pub struct PyExperiment {
    inner: Mutex<RustExperiment>,
    cancel: CancellationToken,
}

impl PyExperiment {
    fn with_inner<T>(&self, f: impl FnOnce(&mut RustExperiment) -> PyResult<T>) -> PyResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>("experiment lock poisoned"))?;
        f(&mut inner)
    }
}

#[pymethods]
impl PyExperiment {
    /// Create an experiment logging to `log_path`
    ///
    /// With `resume=True`, an existing log is recovered and continued
    /// when possible; otherwise the log is started fresh.
    #[new]
    #[pyo3(signature = (config, capability, log_path, resume = false))]
    fn new(config: &Bound<'_, PyAny>, capability: PyObject, log_path: &str, resume: bool) -> PyResult<Self> {
        let config = parse_experiment_config(config)?;
        let capability = Arc::new(PyCapability::new(capability));

        let inner = if resume {
            RustExperiment::open(config, capability, log_path)
        } else {
            JsonlEventLog::create(log_path)
                .map_err(Into::into)
                .and_then(|sink| RustExperiment::new(config, capability, Box::new(sink)))
        }
        .map_err(|e| runtime_error("Failed to create experiment", e))?;

        let cancel = inner.cancellation_token();
        Ok(PyExperiment {
            inner: Mutex::new(inner),
            cancel,
        })
    }

    /// Run all remaining rounds; returns the summary as a JSON string
    ///
    /// The GIL is released while rounds execute so parallel workers can
    /// call back into Python.
    fn run(&self, py: Python<'_>) -> PyResult<String> {
        let summary = py.allow_threads(|| {
            self.with_inner(|inner| inner.run().map_err(|e| runtime_error("Experiment failed", e)))
        })?;
        serde_json::to_string(&summary).map_err(|e| value_error(e.to_string()))
    }

    /// Execute the next round only
    fn run_round(&self, py: Python<'_>) -> PyResult<Py<PyDict>> {
        let result = py.allow_threads(|| {
            self.with_inner(|inner| inner.run_round().map_err(|e| runtime_error("Round failed", e)))
        })?;
        round_result_to_py(py, &result)
    }

    /// Stop before the next round (or next agent, in sequential mode)
    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_terminated(&self) -> PyResult<bool> {
        self.with_inner(|inner| Ok(inner.is_terminated()))
    }

    fn experiment_id(&self) -> PyResult<String> {
        self.with_inner(|inner| Ok(inner.experiment_id().to_string()))
    }

    /// Entropy after each completed round
    fn entropy_history(&self) -> PyResult<Vec<f64>> {
        self.with_inner(|inner| Ok(inner.state().entropy_history().to_vec()))
    }

    /// Current stance of every agent, by id
    fn stances(&self, py: Python<'_>) -> PyResult<Py<PyDict>> {
        self.with_inner(|inner| {
            let dict = PyDict::new(py);
            for (id, checkpoint) in inner.state().checkpoints() {
                dict.set_item(id, checkpoint.stance.as_str())?;
            }
            Ok(dict.unbind())
        })
    }
}

/// Recover and truncate an existing log
///
/// Returns the last complete round when the log can be resumed, `None`
/// when the experiment must restart from round 0.
#[pyfunction]
pub fn prepare_resume(log_path: &str, config: &Bound<'_, PyAny>) -> PyResult<Option<usize>> {
    let config = parse_experiment_config(config)?;
    match rust_prepare_resume(log_path, &config).map_err(|e| runtime_error("Recovery failed", e))? {
        ResumeDecision::Resume(point) => Ok(Some(point.last_complete_round)),
        ResumeDecision::Restart { .. } => Ok(None),
    }
}
