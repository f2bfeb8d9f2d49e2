// src/scripts/log.rs

//! Append-only, cursor-served script output.
//!
//! Each entry is persisted as one JSON line
//! `["stdout"|"stderr"|"debug", message, timestamp]`. The sequence number of
//! an entry is its 1-based line number, so a reader resumes by passing the
//! last sequence it has seen.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::types::ProcessOutputSource;

pub const MASK: &str = "********";

/// One line of output from a script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub source: ProcessOutputSource,
    pub message: String,
    pub occurred: DateTime<Utc>,
}

/// Replaces registered sensitive values in log messages.
#[derive(Debug, Clone, Default)]
pub struct SensitiveValueMasker {
    // Longest first, so a value containing another is masked whole.
    values: Arc<Vec<String>>,
}

impl SensitiveValueMasker {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values.dedup();
        Self {
            values: Arc::new(values),
        }
    }

    pub fn mask<'a>(&self, message: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(message);
        for value in self.values.iter() {
            if out.contains(value.as_str()) {
                out = Cow::Owned(out.replace(value.as_str(), MASK));
            }
        }
        out
    }
}

#[derive(Debug)]
struct LogInner {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    masker: SensitiveValueMasker,
    sync: Mutex<()>,
}

/// Output log of one ticket. Cheap to clone; clones share the same file and
/// monitor.
#[derive(Debug, Clone)]
pub struct ScriptLog {
    inner: Arc<LogInner>,
}

impl ScriptLog {
    pub fn new(path: PathBuf, fs: Arc<dyn FileSystem>, masker: SensitiveValueMasker) -> Self {
        Self {
            inner: Arc::new(LogInner {
                path,
                fs,
                masker,
                sync: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn writer(&self) -> ScriptLogWriter {
        ScriptLogWriter { log: self.clone() }
    }

    /// Entries after `after_sequence`, plus the cursor to pass next time.
    ///
    /// An empty slice means nothing new has been written yet. A line that
    /// cannot be parsed yields one synthetic stderr entry and ends the read.
    pub fn get_output(&self, after_sequence: u64) -> Result<(Vec<ProcessOutput>, u64)> {
        let _guard = self.guard();
        if !self.inner.fs.exists(&self.inner.path) {
            return Ok((Vec::new(), after_sequence));
        }
        let text = self.inner.fs.read_to_string(&self.inner.path)?;

        let mut results = Vec::new();
        let mut sequence = 0u64;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            sequence += 1;
            if sequence <= after_sequence {
                continue;
            }
            match parse_line(line) {
                Some(output) => results.push(output),
                None => {
                    warn!(path = ?self.inner.path, line = sequence, "corrupt script log line");
                    results.push(ProcessOutput {
                        source: ProcessOutputSource::StdErr,
                        message: format!(
                            "Corrupt script log at line {sequence}, no more logs will be read"
                        ),
                        occurred: Utc::now(),
                    });
                    break;
                }
            }
        }

        Ok((results, sequence.max(after_sequence)))
    }

    fn append(&self, source: ProcessOutputSource, message: &str) -> Result<()> {
        let masked = self.inner.masker.mask(message);
        let mut line = serde_json::to_string(&(source.as_str(), masked.as_ref(), Utc::now()))?;
        line.push('\n');

        let _guard = self.guard();
        self.inner.fs.append(&self.inner.path, line.as_bytes())?;
        Ok(())
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.inner.sync.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_line(line: &str) -> Option<ProcessOutput> {
    let (source, message, occurred): (String, String, DateTime<Utc>) =
        serde_json::from_str(line).ok()?;
    Some(ProcessOutput {
        source: source.parse().ok()?,
        message,
        occurred,
    })
}

/// Handle used by a running script to append output.
#[derive(Debug, Clone)]
pub struct ScriptLogWriter {
    log: ScriptLog,
}

impl ScriptLogWriter {
    pub fn write_output(&self, source: ProcessOutputSource, message: &str) -> Result<()> {
        self.log.append(source, message)
    }

    /// Like [`write_output`](Self::write_output), but failures are only
    /// traced. Used from callbacks that cannot propagate errors.
    pub fn write_output_lossy(&self, source: ProcessOutputSource, message: &str) {
        if let Err(err) = self.log.append(source, message) {
            warn!(path = ?self.log.path(), error = %err, "failed to write script log");
        }
    }
}
