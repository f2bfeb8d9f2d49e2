// src/exec/mod.rs

//! Script execution backends.
//!
//! - [`backend`] defines the `ScriptBackend` seam the script runner drives.
//! - [`shell`] is the table of local shells (Bash, PowerShell, pwsh).
//! - [`process`] spawns a child process and streams its output into the
//!   script log, killing it on cancellation.
//! - [`local`] runs the bootstrap script with a local shell.
//! - [`job`] runs it as a run-to-completion Kubernetes job and tails the
//!   job's output files.
//!
//! [`ExecutionStrategy`] is chosen once at startup and turned into the
//! backend shared by every script.

pub mod backend;
pub mod job;
pub mod local;
pub mod process;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

pub use backend::{ScriptBackend, ScriptExit, ScriptRun};
pub use job::{JobBackend, JobSettings};
pub use local::LocalShellBackend;
pub use shell::Shell;

use job::client::KubectlJobClient;

/// The way scripts are executed on this agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStrategy {
    LocalShell {
        shell: Shell,
        executable: Option<PathBuf>,
    },
    ContainerJob(JobSettings),
}

impl ExecutionStrategy {
    /// Pick the strategy from configuration, falling back to the platform
    /// shell.
    pub fn select(
        shell: Option<Shell>,
        executable: Option<PathBuf>,
        job: Option<JobSettings>,
    ) -> Self {
        match job {
            Some(settings) => ExecutionStrategy::ContainerJob(settings),
            None => ExecutionStrategy::LocalShell {
                shell: shell.unwrap_or_else(Shell::detect),
                executable,
            },
        }
    }

    pub fn into_backend(self) -> Arc<dyn ScriptBackend> {
        match self {
            ExecutionStrategy::LocalShell { shell, executable } => {
                let backend = LocalShellBackend::new(shell);
                match executable {
                    Some(path) => Arc::new(backend.with_executable(path)),
                    None => Arc::new(backend),
                }
            }
            ExecutionStrategy::ContainerJob(settings) => {
                let client = KubectlJobClient::new(settings.kubectl.clone(), settings.namespace.clone());
                Arc::new(JobBackend::new(Arc::new(client), settings))
            }
        }
    }
}
