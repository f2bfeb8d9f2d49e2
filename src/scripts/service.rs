// src/scripts/service.rs

//! Ticket-keyed entry point for starting, observing, cancelling and
//! completing scripts.
//!
//! Requests are idempotent per ticket: starting a ticket that is already
//! known returns its status instead of running it again, and status queries
//! for tickets this process never launched are answered from the persisted
//! state in the workspace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::ScriptBackend;
use crate::fs::FileSystem;
use crate::isolation::IsolationMutex;
use crate::types::{IsolationLevel, ProcessState, ScriptTicket};

use super::exit_codes;
use super::log::{ProcessOutput, SensitiveValueMasker};
use super::runner::{RunningScript, ScriptContext};
use super::workspace::{IsolationSettings, ScriptFile, ScriptWorkspace, ScriptWorkspaceFactory};

/// Request to run one script.
#[derive(Debug, Clone)]
pub struct StartScriptCommand {
    pub ticket: ScriptTicket,
    pub task_id: String,
    pub script_body: String,
    pub isolation: IsolationSettings,
    pub arguments: Vec<String>,
    pub files: Vec<ScriptFile>,
    /// Block the start call for up to this long so short scripts can report
    /// their final status in one round trip.
    pub duration_to_wait_for_script_to_finish: Option<Duration>,
}

impl StartScriptCommand {
    pub fn new(
        ticket: ScriptTicket,
        task_id: impl Into<String>,
        script_body: impl Into<String>,
    ) -> Self {
        Self {
            ticket,
            task_id: task_id.into(),
            script_body: script_body.into(),
            isolation: IsolationSettings::default(),
            arguments: Vec::new(),
            files: Vec::new(),
            duration_to_wait_for_script_to_finish: None,
        }
    }

    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation.level = level;
        self
    }

    pub fn with_mutex_timeout(mut self, timeout: Duration) -> Self {
        self.isolation.mutex_acquire_timeout = timeout;
        self
    }

    pub fn with_mutex_name(mut self, name: impl Into<String>) -> Self {
        self.isolation.mutex_name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push(ScriptFile {
            name: name.into(),
            contents: contents.into(),
        });
        self
    }

    pub fn wait_for_finish(mut self, duration: Duration) -> Self {
        self.duration_to_wait_for_script_to_finish = Some(duration);
        self
    }
}

/// Status snapshot plus any log lines written since the caller's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStatusResponse {
    pub ticket: ScriptTicket,
    pub state: ProcessState,
    pub exit_code: i32,
    pub logs: Vec<ProcessOutput>,
    pub next_log_sequence: u64,
}

#[derive(Debug)]
pub struct ScriptService {
    workspaces: ScriptWorkspaceFactory,
    backend: Arc<dyn ScriptBackend>,
    mutex: IsolationMutex,
    running: Mutex<HashMap<ScriptTicket, Arc<RunningScript>>>,
}

impl ScriptService {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        backend: Arc<dyn ScriptBackend>,
        mutex: IsolationMutex,
    ) -> Self {
        let workspaces =
            ScriptWorkspaceFactory::new(workspace_root, fs, backend.bootstrap_file_name());
        Self {
            workspaces,
            backend,
            mutex,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_masker(mut self, masker: SensitiveValueMasker) -> Self {
        self.workspaces = self.workspaces.with_masker(masker);
        self
    }

    pub fn workspaces(&self) -> &ScriptWorkspaceFactory {
        &self.workspaces
    }

    pub fn backend(&self) -> &Arc<dyn ScriptBackend> {
        &self.backend
    }

    /// Launch the script for `command.ticket`, or report on it if the ticket
    /// is already known.
    pub async fn start_script(&self, command: StartScriptCommand) -> Result<ScriptStatusResponse> {
        let ticket = command.ticket.clone();

        let script = match self.launch(&command)? {
            Some(script) => script,
            None => return self.get_status(&ticket, 0),
        };

        if let Some(wait) = command.duration_to_wait_for_script_to_finish {
            if tokio::time::timeout(wait, script.wait_for_completion())
                .await
                .is_err()
            {
                debug!(ticket = %ticket, ?wait, "script still running after start wait");
            }
        }

        self.get_status(&ticket, 0)
    }

    /// Current status and log entries after `last_log_sequence`.
    pub fn get_status(
        &self,
        ticket: &ScriptTicket,
        last_log_sequence: u64,
    ) -> Result<ScriptStatusResponse> {
        if let Some(script) = self.running_script(ticket) {
            // Status first: once Complete is observed every log line has
            // already been written.
            let status = script.status();
            let (logs, next_log_sequence) = script.log().get_output(last_log_sequence)?;
            return Ok(ScriptStatusResponse {
                ticket: ticket.clone(),
                state: status.state,
                exit_code: status.exit_code,
                logs,
                next_log_sequence,
            });
        }

        if !self.workspaces.has_workspace(ticket) {
            return Ok(unknown_script(ticket, last_log_sequence));
        }

        let workspace = self.workspaces.get_workspace(ticket)?;
        let store = workspace.state_store();
        let (state, exit_code) = if store.exists() {
            let mut state = store.load()?;
            if !state.has_completed() {
                // Nothing in this process is running it, so the run was lost
                // (typically the agent restarted mid-script).
                warn!(ticket = %ticket, state = %state.state, "no running process for incomplete script");
                state.complete(exit_codes::UNKNOWN_RESULT, false)?;
                store.save(&state)?;
            }
            (
                state.state,
                state.exit_code.unwrap_or(exit_codes::UNKNOWN_RESULT),
            )
        } else {
            (ProcessState::Complete, exit_codes::UNKNOWN_SCRIPT)
        };

        let (logs, next_log_sequence) = workspace.create_log().get_output(last_log_sequence)?;
        Ok(ScriptStatusResponse {
            ticket: ticket.clone(),
            state,
            exit_code,
            logs,
            next_log_sequence,
        })
    }

    /// Request cancellation and return the status as of now. The script
    /// reaches Complete asynchronously.
    pub fn cancel_script(
        &self,
        ticket: &ScriptTicket,
        last_log_sequence: u64,
    ) -> Result<ScriptStatusResponse> {
        if let Some(script) = self.running_script(ticket) {
            info!(ticket = %ticket, "cancel requested");
            script.cancel();
        }
        self.get_status(ticket, last_log_sequence)
    }

    /// Return the final status and release everything held for `ticket`,
    /// including its workspace.
    pub fn complete_script(
        &self,
        ticket: &ScriptTicket,
        last_log_sequence: u64,
    ) -> Result<ScriptStatusResponse> {
        let response = self.get_status(ticket, last_log_sequence)?;

        if let Some(script) = self.running().remove(ticket) {
            if script.state() != ProcessState::Complete {
                warn!(ticket = %ticket, "completing a script that is still running; cancelling it");
                script.cancel();
            }
        }

        if self.workspaces.has_workspace(ticket) {
            self.workspaces.get_workspace(ticket)?.delete()?;
        }
        info!(ticket = %ticket, exit_code = response.exit_code, "script completed and cleaned up");
        Ok(response)
    }

    /// Cancel every script this service is still tracking.
    pub fn shutdown(&self) {
        let running = self.running();
        for (ticket, script) in running.iter() {
            if script.state() != ProcessState::Complete {
                info!(ticket = %ticket, "cancelling script on shutdown");
                script.cancel();
            }
        }
    }

    pub fn running_script(&self, ticket: &ScriptTicket) -> Option<Arc<RunningScript>> {
        self.running().get(ticket).cloned()
    }

    /// Start the worker for a new ticket. `None` means the ticket already
    /// ran (or is running) and must not be started again.
    fn launch(&self, command: &StartScriptCommand) -> Result<Option<Arc<RunningScript>>> {
        let ticket = &command.ticket;
        let mut running = self.running();

        if running.contains_key(ticket) {
            debug!(ticket = %ticket, "script already running");
            return Ok(None);
        }

        let workspace = match self.existing_workspace(command)? {
            Existing::AlreadyStarted => return Ok(None),
            Existing::NotStarted(workspace) => workspace,
            Existing::Fresh => {
                let workspace = self.workspaces.prepare_workspace(
                    ticket,
                    &command.script_body,
                    command.isolation.clone(),
                    &command.arguments,
                    &command.files,
                )?;
                workspace.state_store().create()?;
                workspace
            }
        };

        let store = Arc::new(workspace.state_store());
        let log = workspace.create_log();
        let script = Arc::new(RunningScript::start(ScriptContext {
            workspace,
            state_store: Some(store),
            log,
            backend: Arc::clone(&self.backend),
            mutex: self.mutex.clone(),
            task_id: command.task_id.clone(),
        })?);

        running.insert(ticket.clone(), Arc::clone(&script));
        info!(
            ticket = %ticket,
            task_id = %command.task_id,
            backend = %self.backend.name(),
            "script launched"
        );
        Ok(Some(script))
    }

    fn existing_workspace(&self, command: &StartScriptCommand) -> Result<Existing> {
        let ticket = &command.ticket;
        if !self.workspaces.has_workspace(ticket) {
            return Ok(Existing::Fresh);
        }

        let mut workspace = self.workspaces.get_workspace(ticket)?;
        let store = workspace.state_store();
        if !store.exists() {
            return Ok(Existing::Fresh);
        }

        let state = store.load()?;
        if state.has_started() {
            debug!(ticket = %ticket, state = %state.state, "script already started, not running again");
            return Ok(Existing::AlreadyStarted);
        }

        // Prepared by an earlier request that never got to run it.
        workspace.isolation = command.isolation.clone();
        workspace.script_arguments = command.arguments.clone();
        Ok(Existing::NotStarted(workspace))
    }

    fn running(&self) -> MutexGuard<'_, HashMap<ScriptTicket, Arc<RunningScript>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Existing {
    Fresh,
    NotStarted(ScriptWorkspace),
    AlreadyStarted,
}

fn unknown_script(ticket: &ScriptTicket, last_log_sequence: u64) -> ScriptStatusResponse {
    ScriptStatusResponse {
        ticket: ticket.clone(),
        state: ProcessState::Complete,
        exit_code: exit_codes::UNKNOWN_SCRIPT,
        logs: Vec::new(),
        next_log_sequence: last_log_sequence,
    }
}
