// src/scripts/workspace.rs

//! Per-ticket working directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{AgentError, Result};
use crate::fs::FileSystem;
use crate::isolation::NO_TIMEOUT;
use crate::types::{IsolationLevel, ScriptTicket};

use super::log::{ScriptLog, SensitiveValueMasker};
use super::state::ScriptStateStore;

pub const LOG_FILE_NAME: &str = "Output.log";

/// Default lock name when a script does not ask for a specific one.
pub const DEFAULT_MUTEX_NAME: &str = "RunningScript";

/// An extra file shipped alongside the script body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Isolation settings recorded when the workspace is prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationSettings {
    pub level: IsolationLevel,
    pub mutex_acquire_timeout: Duration,
    pub mutex_name: Option<String>,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self {
            level: IsolationLevel::NoIsolation,
            mutex_acquire_timeout: NO_TIMEOUT,
            mutex_name: None,
        }
    }
}

impl IsolationSettings {
    pub fn mutex_name(&self) -> &str {
        self.mutex_name.as_deref().unwrap_or(DEFAULT_MUTEX_NAME)
    }
}

/// Working directory, bootstrap script and log of one ticket.
#[derive(Debug, Clone)]
pub struct ScriptWorkspace {
    ticket: ScriptTicket,
    working_directory: PathBuf,
    bootstrap_file_name: String,
    fs: Arc<dyn FileSystem>,
    masker: SensitiveValueMasker,
    pub isolation: IsolationSettings,
    pub script_arguments: Vec<String>,
}

impl ScriptWorkspace {
    pub fn ticket(&self) -> &ScriptTicket {
        &self.ticket
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn bootstrap_script_path(&self) -> PathBuf {
        self.resolve_path(&self.bootstrap_file_name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve_path(LOG_FILE_NAME)
    }

    pub fn resolve_path(&self, file_name: &str) -> PathBuf {
        self.working_directory.join(file_name)
    }

    pub fn write_file(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        self.fs.write(&self.resolve_path(file_name), contents)?;
        Ok(())
    }

    pub fn bootstrap_script(&self, script_body: &str) -> Result<()> {
        self.fs
            .write(&self.bootstrap_script_path(), script_body.as_bytes())?;
        Ok(())
    }

    pub fn create_log(&self) -> ScriptLog {
        ScriptLog::new(self.log_path(), Arc::clone(&self.fs), self.masker.clone())
    }

    pub fn state_store(&self) -> ScriptStateStore {
        ScriptStateStore::new(self.ticket.clone(), &self.working_directory, Arc::clone(&self.fs))
    }

    pub fn delete(&self) -> Result<()> {
        if self.fs.exists(&self.working_directory) {
            self.fs.remove_dir_all(&self.working_directory)?;
            debug!(ticket = %self.ticket, dir = ?self.working_directory, "deleted workspace");
        }
        Ok(())
    }
}

/// Creates workspaces under a common root, one directory per ticket.
#[derive(Debug, Clone)]
pub struct ScriptWorkspaceFactory {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    bootstrap_file_name: String,
    masker: SensitiveValueMasker,
}

impl ScriptWorkspaceFactory {
    pub fn new(
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        bootstrap_file_name: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            fs,
            bootstrap_file_name: bootstrap_file_name.into(),
            masker: SensitiveValueMasker::default(),
        }
    }

    pub fn with_masker(mut self, masker: SensitiveValueMasker) -> Self {
        self.masker = masker;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `ticket` directly below the root. Tickets that are
    /// empty, `.`/`..` or contain a separator are rejected.
    pub fn working_directory_path(&self, ticket: &ScriptTicket) -> Result<PathBuf> {
        if !ticket.is_valid_directory_name() {
            return Err(AgentError::InvalidTicket(ticket.as_str().to_string()));
        }
        Ok(self.root.join(ticket.as_str()))
    }

    /// False for tickets that cannot name a workspace.
    pub fn has_workspace(&self, ticket: &ScriptTicket) -> bool {
        self.working_directory_path(ticket)
            .is_ok_and(|dir| self.fs.exists(&dir))
    }

    /// Workspace for `ticket`, creating its directory if needed.
    pub fn get_workspace(&self, ticket: &ScriptTicket) -> Result<ScriptWorkspace> {
        let working_directory = self.working_directory_path(ticket)?;
        self.fs.create_dir_all(&working_directory)?;
        Ok(ScriptWorkspace {
            ticket: ticket.clone(),
            working_directory,
            bootstrap_file_name: self.bootstrap_file_name.clone(),
            fs: Arc::clone(&self.fs),
            masker: self.masker.clone(),
            isolation: IsolationSettings::default(),
            script_arguments: Vec::new(),
        })
    }

    /// Workspace with the script body and extra files written out.
    pub fn prepare_workspace(
        &self,
        ticket: &ScriptTicket,
        script_body: &str,
        isolation: IsolationSettings,
        script_arguments: &[String],
        files: &[ScriptFile],
    ) -> Result<ScriptWorkspace> {
        let mut workspace = self.get_workspace(ticket)?;
        workspace.isolation = isolation;
        workspace.script_arguments = script_arguments.to_vec();

        workspace.bootstrap_script(script_body)?;
        for file in files {
            workspace.write_file(&file.name, &file.contents)?;
        }

        info!(
            ticket = %ticket,
            dir = ?workspace.working_directory,
            files = files.len(),
            "prepared script workspace"
        );
        Ok(workspace)
    }
}
