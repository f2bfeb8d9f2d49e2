// src/exec/local.rs

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Result;

use super::backend::{ScriptBackend, ScriptExit, ScriptRun};
use super::process::run_process;
use super::shell::Shell;

/// Runs the bootstrap script with a shell on this machine.
#[derive(Debug, Clone)]
pub struct LocalShellBackend {
    shell: Shell,
    executable: PathBuf,
}

impl LocalShellBackend {
    pub fn new(shell: Shell) -> Self {
        Self {
            shell,
            executable: shell.default_executable(),
        }
    }

    /// Use a specific executable instead of the one found on `PATH`.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }
}

impl ScriptBackend for LocalShellBackend {
    fn name(&self) -> String {
        self.executable.display().to_string()
    }

    fn bootstrap_file_name(&self) -> &'static str {
        self.shell.bootstrap_file_name()
    }

    fn run<'a>(
        &'a self,
        run: ScriptRun<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptExit>> + Send + 'a>> {
        Box::pin(async move {
            let args = self.shell.format_arguments(
                &run.workspace.bootstrap_script_path(),
                &run.workspace.script_arguments,
            );
            run_process(
                &self.executable,
                &args,
                run.workspace.working_directory(),
                run.writer,
                run.cancel,
            )
            .await
        })
    }
}
