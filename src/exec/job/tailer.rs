// src/exec/job/tailer.rs

//! Follows the job's output files and copies new lines into the script log.
//!
//! Shutdown is two-phase: once the completion signal fires the watcher is
//! dropped, then every file is drained one final time, including a trailing
//! line without a newline.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scripts::ScriptLogWriter;
use crate::types::ProcessOutputSource;

pub const OUTPUT_FILE_NAME: &str = "job-output.log";
pub const ERROR_FILE_NAME: &str = "job-error.log";

/// Re-read interval in case the platform drops change notifications (common
/// on host-path volumes written from inside a container).
const FALLBACK_POLL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct OutputFileTail {
    path: PathBuf,
    source: ProcessOutputSource,
    position: u64,
    pending: Vec<u8>,
}

impl OutputFileTail {
    fn new(path: PathBuf, source: ProcessOutputSource) -> Self {
        Self {
            path,
            source,
            position: 0,
            pending: Vec::new(),
        }
    }

    /// Copy complete lines written since the last read. With `flush`, a
    /// trailing partial line is emitted too.
    fn read_new(&mut self, writer: &ScriptLogWriter, flush: bool) -> Result<usize> {
        let mut emitted = 0;

        if self.path.exists() {
            let mut file =
                File::open(&self.path).with_context(|| format!("opening {:?}", self.path))?;
            let len = file.metadata()?.len();
            if len < self.position {
                debug!(path = ?self.path, "output file shrank; reading from the start");
                self.position = 0;
                self.pending.clear();
            }
            file.seek(SeekFrom::Start(self.position))?;
            let read = file.read_to_end(&mut self.pending)?;
            self.position += read as u64;
        }

        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            writer.write_output(self.source, &String::from_utf8_lossy(&line))?;
            emitted += 1;
        }

        if flush && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            writer.write_output(self.source, &String::from_utf8_lossy(&line))?;
            emitted += 1;
        }

        Ok(emitted)
    }
}

/// Tails `job-output.log` (stdout) and `job-error.log` (stderr) in one
/// directory.
#[derive(Debug)]
pub struct OutputTailer {
    dir: PathBuf,
    files: Vec<OutputFileTail>,
}

impl OutputTailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let files = vec![
            OutputFileTail::new(dir.join(OUTPUT_FILE_NAME), ProcessOutputSource::StdOut),
            OutputFileTail::new(dir.join(ERROR_FILE_NAME), ProcessOutputSource::StdErr),
        ];
        Self { dir, files }
    }

    /// Read every file once.
    pub fn poll(&mut self, writer: &ScriptLogWriter, flush: bool) -> Result<usize> {
        let mut total = 0;
        for file in &mut self.files {
            total += file.read_new(writer, flush)?;
        }
        Ok(total)
    }

    fn is_tracked(&self, path: &Path) -> bool {
        self.files.iter().any(|f| path.file_name() == f.path.file_name())
    }

    /// Follow the files until `completed` fires, then drain them.
    pub async fn run(mut self, writer: &ScriptLogWriter, completed: &CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

        // Closure called synchronously by notify whenever an event arrives.
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    // The receiver only goes away once tailing has stopped.
                    let _ = event_tx.send(event);
                }
                Err(err) => warn!(error = %err, "job output watch error"),
            },
            Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        let watcher = match watcher {
            Ok(w) => {
                info!(dir = ?self.dir, "watching job output files");
                Some(w)
            }
            Err(err) => {
                warn!(dir = ?self.dir, error = %err, "could not watch job output; polling instead");
                None
            }
        };

        self.poll(writer, false)?;
        let mut watching = watcher.is_some();

        // Phase 1: follow changes.
        loop {
            tokio::select! {
                biased;
                _ = completed.cancelled() => break,
                event = event_rx.recv(), if watching => match event {
                    Some(event) if event.paths.iter().any(|p| self.is_tracked(p)) => {
                        self.poll(writer, false)?;
                    }
                    Some(_) => {}
                    None => watching = false,
                },
                _ = tokio::time::sleep(FALLBACK_POLL) => {
                    self.poll(writer, false)?;
                }
            }
        }

        // Phase 2: stop watching, then one guaranteed final drain.
        drop(watcher);
        event_rx.close();
        let drained = self.poll(writer, true)?;
        debug!(dir = ?self.dir, lines = drained, "final drain of job output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFileSystem;
    use crate::scripts::{ScriptLog, SensitiveValueMasker};
    use std::io::Write;
    use std::sync::Arc;

    fn log_in(dir: &Path) -> ScriptLog {
        ScriptLog::new(
            dir.join("Output.log"),
            Arc::new(RealFileSystem),
            SensitiveValueMasker::default(),
        )
    }

    #[test]
    fn partial_lines_wait_for_newline_or_flush() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let writer = log.writer();
        let mut tailer = OutputTailer::new(dir.path());

        let mut out = File::create(dir.path().join(OUTPUT_FILE_NAME)).unwrap();
        write!(out, "first\nsec").unwrap();
        out.flush().unwrap();
        assert_eq!(tailer.poll(&writer, false).unwrap(), 1);

        write!(out, "ond\nthird").unwrap();
        out.flush().unwrap();
        assert_eq!(tailer.poll(&writer, false).unwrap(), 1);
        assert_eq!(tailer.poll(&writer, true).unwrap(), 1);

        let (lines, _) = log.get_output(0).unwrap();
        let messages: Vec<_> = lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert!(lines.iter().all(|l| l.source == ProcessOutputSource::StdOut));
    }

    #[test]
    fn error_file_maps_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        std::fs::write(dir.path().join(ERROR_FILE_NAME), "boom\n").unwrap();

        OutputTailer::new(dir.path()).poll(&log.writer(), true).unwrap();

        let (lines, _) = log.get_output(0).unwrap();
        assert_eq!(lines[0].source, ProcessOutputSource::StdErr);
        assert_eq!(lines[0].message, "boom");
    }
}
