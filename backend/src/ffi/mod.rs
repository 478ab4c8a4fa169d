//! Python bindings (PyO3)
//!
//! Compiled only with the `pyo3` feature. Configs and results cross the
//! boundary as JSON strings or dicts; the decision capability is any
//! Python callable taking the request JSON and returning the answer text.

pub mod experiment;
pub mod types;
