// src/scripts/mod.rs

//! Script lifecycle: workspaces, output logs, persisted state, the runner
//! that executes a script under the isolation lock, and the ticket-keyed
//! service in front of it all.

pub mod exit_codes;
pub mod log;
pub mod runner;
pub mod service;
pub mod state;
pub mod workspace;

pub use log::{ProcessOutput, ScriptLog, ScriptLogWriter, SensitiveValueMasker};
pub use runner::{RunningScript, ScriptContext, ScriptStatus};
pub use service::{ScriptService, ScriptStatusResponse, StartScriptCommand};
pub use state::{ScriptState, ScriptStateStore};
pub use workspace::{IsolationSettings, ScriptFile, ScriptWorkspace, ScriptWorkspaceFactory};
