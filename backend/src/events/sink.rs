//! Event sinks
//!
//! - [`JsonlEventLog`]: one JSON object per line on disk, flushed after
//!   every record so a crash leaves the file consistent up to the last
//!   complete line
//! - [`MemoryEventLog`]: shared in-memory log for tests and embedding

use super::types::LogRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Event log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("In-memory event log lock poisoned")]
    Poisoned,
}

impl EventLogError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        EventLogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Destination for log records
pub trait EventSink: Send {
    fn append(&mut self, record: &LogRecord) -> Result<(), EventLogError>;
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn append(&mut self, record: &LogRecord) -> Result<(), EventLogError> {
        (**self).append(record)
    }
}

/// Append-only JSONL file
pub struct JsonlEventLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonlEventLog {
    /// Start a fresh log, replacing any existing file
    ///
    /// Creates parent directories as needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EventLogError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| EventLogError::io(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Continue an existing (already truncated) log
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| EventLogError::io(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventLog {
    fn append(&mut self, record: &LogRecord) -> Result<(), EventLogError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line).map_err(|e| EventLogError::io(&self.path, e))?;
        self.writer.flush().map_err(|e| EventLogError::io(&self.path, e))
    }
}

impl Drop for JsonlEventLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// In-memory log; clones share the same record buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLog {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records rendered exactly as [`JsonlEventLog`] would write them
    pub fn to_jsonl(&self) -> Result<String, EventLogError> {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EventSink for MemoryEventLog {
    fn append(&mut self, record: &LogRecord) -> Result<(), EventLogError> {
        self.records
            .lock()
            .map_err(|_| EventLogError::Poisoned)?
            .push(record.clone());
        Ok(())
    }
}

/// One parsed line of a log file, with its original text
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub text: String,
    pub record: LogRecord,
}

/// Contents of a possibly torn log
#[derive(Debug, Clone, Default)]
pub struct LogContents {
    pub lines: Vec<LogLine>,
    /// Lines after (and including) the first one that failed to parse
    pub discarded_lines: usize,
}

/// Read a JSONL log, stopping at the first unparsable line
///
/// Everything after a torn or corrupt line is treated as lost: the log is
/// append-only, so nothing after it can be trusted to be in order. Blank
/// lines are skipped.
pub fn read_log(path: impl AsRef<Path>) -> Result<LogContents, EventLogError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| EventLogError::io(path, e))?;
    let mut contents = LogContents::default();
    let mut torn = false;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                // Invalid UTF-8 in a torn tail surfaces here
                warn!(path = %path.display(), line = index + 1, error = %e, "unreadable log line");
                torn = true;
                contents.discarded_lines += 1;
                continue;
            }
        };
        if torn {
            contents.discarded_lines += 1;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(&line) {
            Ok(record) => contents.lines.push(LogLine { text: line, record }),
            Err(e) => {
                warn!(path = %path.display(), line = index + 1, error = %e, "log tail is corrupt");
                torn = true;
                contents.discarded_lines += 1;
            }
        }
    }

    Ok(contents)
}
