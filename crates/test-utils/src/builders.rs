#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scriptagent::config::{AgentConfig, RawAgentConfig};
use scriptagent::exec::ScriptBackend;
use scriptagent::fs::FileSystem;
use scriptagent::isolation::{IsolationMutex, LockRegistry};
use scriptagent::scripts::{ScriptService, StartScriptCommand};
use scriptagent::types::{IsolationLevel, ScriptTicket};

/// Builder for `StartScriptCommand` with test-friendly defaults.
pub struct StartScriptCommandBuilder {
    command: StartScriptCommand,
}

impl StartScriptCommandBuilder {
    pub fn new(ticket: &str) -> Self {
        Self {
            command: StartScriptCommand::new(
                ScriptTicket::new(ticket),
                format!("ServerTasks-{ticket}"),
                "echo hello",
            ),
        }
    }

    pub fn body(mut self, body: &str) -> Self {
        self.command.script_body = body.to_string();
        self
    }

    pub fn task_id(mut self, task_id: &str) -> Self {
        self.command.task_id = task_id.to_string();
        self
    }

    pub fn full_isolation(mut self) -> Self {
        self.command = self.command.with_isolation(IsolationLevel::FullIsolation);
        self
    }

    pub fn mutex_name(mut self, name: &str) -> Self {
        self.command = self.command.with_mutex_name(name);
        self
    }

    pub fn mutex_timeout(mut self, timeout: Duration) -> Self {
        self.command = self.command.with_mutex_timeout(timeout);
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.command = self
            .command
            .with_arguments(args.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn file(mut self, name: &str, contents: &str) -> Self {
        self.command = self.command.with_file(name, contents.as_bytes().to_vec());
        self
    }

    pub fn wait_for_finish(mut self, duration: Duration) -> Self {
        self.command = self.command.wait_for_finish(duration);
        self
    }

    pub fn build(self) -> StartScriptCommand {
        self.command
    }
}

/// Builds a `ScriptService` rooted at `root` with a fresh lock registry.
pub fn script_service(
    root: &Path,
    fs: Arc<dyn FileSystem>,
    backend: Arc<dyn ScriptBackend>,
) -> (Arc<ScriptService>, Arc<LockRegistry>) {
    let registry = Arc::new(LockRegistry::new());
    let service = ScriptService::new(
        root.to_path_buf(),
        fs,
        backend,
        IsolationMutex::new(Arc::clone(&registry)),
    );
    (Arc::new(service), registry)
}

/// Parse and validate an inline TOML config.
pub fn config_from_toml(toml_text: &str) -> scriptagent::errors::Result<AgentConfig> {
    let raw: RawAgentConfig = toml::from_str(toml_text)?;
    AgentConfig::try_from(raw)
}
