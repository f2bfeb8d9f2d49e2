// src/scripts/state.rs

//! Crash-safe persisted lifecycle record for one script ticket.
//!
//! The record lives at `scriptstate.json` in the ticket's workspace. Saves go
//! through a uniquely named temp file that is then swapped over the target,
//! keeping the previous version as `scriptstate.json.bak`, so a reader never
//! observes a partially written file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AgentError, Result};
use crate::fs::FileSystem;
use crate::types::{ProcessState, ScriptTicket};

pub const STATE_FILE_NAME: &str = "scriptstate.json";
pub const BACKUP_FILE_NAME: &str = "scriptstate.json.bak";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptState {
    pub ticket: ScriptTicket,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub ran_to_completion: Option<bool>,
}

impl ScriptState {
    pub fn new(ticket: ScriptTicket) -> Self {
        Self {
            ticket,
            created: Utc::now(),
            started: None,
            completed: None,
            state: ProcessState::Pending,
            exit_code: None,
            ran_to_completion: None,
        }
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProcessState::Pending {
            return Err(AgentError::InvalidTransition {
                from: self.state,
                to: ProcessState::Running,
            });
        }
        self.state = ProcessState::Running;
        self.started = Some(Utc::now());
        Ok(())
    }

    /// Pending/Running -> Complete.
    ///
    /// A script that never got the isolation lock completes straight from
    /// Pending and keeps `started` unset.
    pub fn complete(&mut self, exit_code: i32, ran_to_completion: bool) -> Result<()> {
        if self.state == ProcessState::Complete {
            return Err(AgentError::InvalidTransition {
                from: self.state,
                to: ProcessState::Complete,
            });
        }
        self.state = ProcessState::Complete;
        self.completed = Some(Utc::now());
        self.exit_code = Some(exit_code);
        self.ran_to_completion = Some(ran_to_completion);
        Ok(())
    }

    pub fn has_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn has_completed(&self) -> bool {
        self.state == ProcessState::Complete
    }
}

/// Serialized access to the state file of one workspace.
///
/// The internal mutex only protects against concurrent writers inside this
/// process; the file itself assumes a single writing process.
#[derive(Debug)]
pub struct ScriptStateStore {
    ticket: ScriptTicket,
    state_path: PathBuf,
    backup_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    lock: Mutex<()>,
}

impl ScriptStateStore {
    pub fn new(ticket: ScriptTicket, workspace_dir: &Path, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            ticket,
            state_path: workspace_dir.join(STATE_FILE_NAME),
            backup_path: workspace_dir.join(BACKUP_FILE_NAME),
            fs,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Write the initial Pending record. Fails if one already exists.
    pub fn create(&self) -> Result<ScriptState> {
        let _guard = self.guard();
        if self.fs.exists(&self.state_path) {
            return Err(AgentError::StateAlreadyExists(self.display_path()));
        }

        let state = ScriptState::new(self.ticket.clone());
        let json = serde_json::to_vec(&state)?;
        self.fs.create_new(&self.state_path, &json)?;
        debug!(ticket = %self.ticket, path = ?self.state_path, "created script state");
        Ok(state)
    }

    /// Read the current record.
    ///
    /// If the main file cannot be parsed the backup from the previous save is
    /// used instead.
    pub fn load(&self) -> Result<ScriptState> {
        let _guard = self.guard();
        self.ensure_exists()?;

        match self.read_state(&self.state_path) {
            Ok(state) => Ok(state),
            Err(err) if self.fs.exists(&self.backup_path) => {
                warn!(
                    ticket = %self.ticket,
                    error = %err,
                    "script state unreadable, falling back to backup"
                );
                self.read_state(&self.backup_path)
            }
            Err(err) => Err(err),
        }
    }

    /// Atomically overwrite the record. Requires a prior `create`.
    pub fn save(&self, state: &ScriptState) -> Result<()> {
        let _guard = self.guard();
        self.ensure_exists()?;

        let json = serde_json::to_vec(state)?;
        let temp_path = self
            .state_path
            .with_file_name(format!("{STATE_FILE_NAME}.{}.tmp", uuid::Uuid::new_v4().simple()));

        self.fs.write(&temp_path, &json)?;
        if let Err(err) = self
            .fs
            .replace(&temp_path, &self.state_path, Some(&self.backup_path))
        {
            if let Err(cleanup) = self.fs.remove_file(&temp_path) {
                debug!(path = ?temp_path, error = %cleanup, "could not remove temp state file");
            }
            return Err(err.into());
        }

        debug!(ticket = %self.ticket, state = %state.state, "saved script state");
        Ok(())
    }

    pub fn exists(&self) -> bool {
        let _guard = self.guard();
        self.fs.exists(&self.state_path)
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.fs.exists(&self.state_path) {
            Ok(())
        } else {
            Err(AgentError::StateMissing(self.display_path()))
        }
    }

    fn read_state(&self, path: &Path) -> Result<ScriptState> {
        let text = self.fs.read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn display_path(&self) -> String {
        self.state_path.display().to_string()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        let mut state = ScriptState::new(ScriptTicket::new("t"));
        state.start().unwrap();
        assert!(state.start().is_err());
        state.complete(0, true).unwrap();
        assert!(matches!(
            state.complete(1, true),
            Err(AgentError::InvalidTransition { from: ProcessState::Complete, .. })
        ));
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn completing_from_pending_leaves_started_unset() {
        let mut state = ScriptState::new(ScriptTicket::new("t"));
        state.complete(-44, false).unwrap();
        assert!(!state.has_started());
        assert!(state.has_completed());
        assert!(state.completed.is_some());
    }
}
