// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::{ExecutionStrategy, JobSettings};
use crate::scripts::workspace::DEFAULT_MUTEX_NAME;
use crate::types::TimeoutStrategy;

/// Agent configuration as read from a TOML file.
///
/// ```toml
/// [agent]
/// workspace_root = "/var/lib/scriptagent/work"
/// task_id = "ServerTasks-1"
///
/// [isolation]
/// mutex_acquire_timeout_secs = 600
/// mutex_name = "RunningScript"
///
/// [shell]
/// kind = "bash"
///
/// [job]
/// enabled = false
/// image = "octopusdeploy/worker-tools:ubuntu.22.04"
///
/// [rpc]
/// retries_enabled = true
/// retry_timeout_secs = 150
/// timeout_strategy = "pessimistic"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub isolation: IsolationSection,

    #[serde(default)]
    pub shell: ShellSection,

    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub rpc: RpcSection,
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// Directory under which one workspace per ticket is created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Task id used when the command line does not provide one.
    #[serde(default)]
    pub task_id: Option<String>,

    /// Values masked out of every script log line.
    #[serde(default)]
    pub sensitive_values: Vec<String>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./work")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            task_id: None,
            sensitive_values: Vec::new(),
        }
    }
}

/// `[isolation]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationSection {
    /// `None` waits for as long as it takes.
    #[serde(default)]
    pub mutex_acquire_timeout_secs: Option<u64>,

    #[serde(default = "default_mutex_name")]
    pub mutex_name: String,
}

fn default_mutex_name() -> String {
    DEFAULT_MUTEX_NAME.to_string()
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            mutex_acquire_timeout_secs: None,
            mutex_name: default_mutex_name(),
        }
    }
}

/// `[shell]` section. Both keys override platform detection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellSection {
    /// `"bash"`, `"powershell"` or `"pwsh"`.
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// `[job]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSection {
    /// Run scripts as Kubernetes jobs instead of with a local shell.
    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub settings: JobSettings,
}

/// `[rpc]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSection {
    #[serde(default = "default_retries_enabled")]
    pub retries_enabled: bool,

    #[serde(default = "default_retry_timeout_secs")]
    pub retry_timeout_secs: u64,

    /// `"optimistic"` or `"pessimistic"`.
    #[serde(default = "default_timeout_strategy")]
    pub timeout_strategy: String,

    /// Grace period for a canceled call on the no-retry path before it is
    /// abandoned. `None` waits for the call to stop on its own.
    #[serde(default)]
    pub abandon_after_secs: Option<u64>,
}

fn default_retries_enabled() -> bool {
    true
}

fn default_retry_timeout_secs() -> u64 {
    150
}

fn default_timeout_strategy() -> String {
    "pessimistic".to_string()
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            retries_enabled: default_retries_enabled(),
            retry_timeout_secs: default_retry_timeout_secs(),
            timeout_strategy: default_timeout_strategy(),
            abandon_after_secs: None,
        }
    }
}

/// Validated configuration used by the rest of the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub workspace_root: PathBuf,
    pub task_id: Option<String>,
    pub sensitive_values: Vec<String>,
    pub isolation: IsolationDefaults,
    pub strategy: ExecutionStrategy,
    pub rpc: RpcSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationDefaults {
    pub mutex_acquire_timeout: Duration,
    pub mutex_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSettings {
    pub retries_enabled: bool,
    pub retry_timeout: Duration,
    pub timeout_strategy: TimeoutStrategy,
    pub abandon_after: Option<Duration>,
}

/// `serde(with = ...)` helper for durations written as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
