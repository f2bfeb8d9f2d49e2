// src/exec/backend.rs

//! Pluggable script backend abstraction.
//!
//! The script runner talks to a `ScriptBackend` instead of spawning
//! processes itself, so the isolation, state and exit-code handling is shared
//! between the local shell and the containerized job, and tests can swap in
//! a backend that does not touch the OS.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::scripts::{ScriptLogWriter, ScriptWorkspace};

/// How a backend run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptExit {
    /// The script ran and produced this exit code.
    Exited(i32),
    /// The run was stopped because cancellation was requested.
    Canceled,
}

/// Everything a backend needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRun<'a> {
    pub workspace: &'a ScriptWorkspace,
    pub task_id: &'a str,
    pub writer: &'a ScriptLogWriter,
    pub cancel: &'a CancellationToken,
}

/// Trait abstracting how a prepared workspace is executed.
///
/// An `Err` means the backend could not be invoked at all (missing shell,
/// rejected job manifest); the runner reports it with a reserved exit code.
pub trait ScriptBackend: Send + Sync + Debug {
    /// Short name used in log messages, e.g. `bash` or `kubernetes job`.
    fn name(&self) -> String;

    /// File name the script body is written to inside the workspace.
    fn bootstrap_file_name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        run: ScriptRun<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptExit>> + Send + 'a>>;
}
