//! Event log
//!
//! The append-only, line-delimited record of an experiment. The same log
//! is both the research output and the only source of truth for crash
//! recovery (see `orchestrator::checkpoint`).
//!
//! # Components
//!
//! - **types**: the tagged [`LogRecord`] enum
//! - **sink**: [`EventSink`] implementations and the torn-tail tolerant reader

pub mod sink;
pub mod types;

// Re-exports for convenience
pub use sink::{read_log, EventLogError, EventSink, JsonlEventLog, LogContents, LogLine, MemoryEventLog};
pub use types::LogRecord;
