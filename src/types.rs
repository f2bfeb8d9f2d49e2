// src/types.rs

//! Small value types shared across the agent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Concurrency policy requested by a script.
///
/// - `NoIsolation`: any number of scripts may run at the same time under the
///   same lock name (shared/read access).
/// - `FullIsolation`: the script requires that nothing else runs under the
///   same lock name (exclusive/write access).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    NoIsolation,
    FullIsolation,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::NoIsolation
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "no" | "noisolation" => Ok(IsolationLevel::NoIsolation),
            "full" | "fullisolation" => Ok(IsolationLevel::FullIsolation),
            other => Err(format!(
                "invalid isolation level: {other} (expected \"none\" or \"full\")"
            )),
        }
    }
}

/// Lifecycle of a single script run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessState {
    Pending,
    Running,
    Complete,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Pending => "Pending",
            ProcessState::Running => "Running",
            ProcessState::Complete => "Complete",
        };
        f.write_str(s)
    }
}

/// Where a line of script output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessOutputSource {
    StdOut,
    StdErr,
    Debug,
}

impl ProcessOutputSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutputSource::StdOut => "stdout",
            ProcessOutputSource::StdErr => "stderr",
            ProcessOutputSource::Debug => "debug",
        }
    }
}

impl FromStr for ProcessOutputSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(ProcessOutputSource::StdOut),
            "stderr" => Ok(ProcessOutputSource::StdErr),
            "debug" => Ok(ProcessOutputSource::Debug),
            other => Err(format!("unknown output source: {other}")),
        }
    }
}

/// How the per-attempt deadline of a retried RPC call is enforced.
///
/// - `Optimistic`: the attempt's cancellation token is signalled at the
///   deadline, but the attempt is awaited until it returns on its own.
/// - `Pessimistic`: the attempt is abandoned at the deadline (its token is
///   signalled and the retry loop stops waiting for it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutStrategy {
    Optimistic,
    Pessimistic,
}

impl Default for TimeoutStrategy {
    fn default() -> Self {
        TimeoutStrategy::Pessimistic
    }
}

impl FromStr for TimeoutStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "optimistic" => Ok(TimeoutStrategy::Optimistic),
            "pessimistic" => Ok(TimeoutStrategy::Pessimistic),
            other => Err(format!(
                "invalid timeout_strategy: {other} (expected \"optimistic\" or \"pessimistic\")"
            )),
        }
    }
}

/// Opaque identifier for one script execution request. It names the
/// workspace, log and state file belonging to that request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptTicket(String);

impl ScriptTicket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, random ticket.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the ticket can name its own directory: exactly one normal
    /// path component, so it never resolves to the root or outside it.
    pub fn is_valid_directory_name(&self) -> bool {
        let mut components = std::path::Path::new(&self.0).components();
        matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        ) && !self.0.contains(['/', '\\'])
    }
}

impl fmt::Display for ScriptTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
