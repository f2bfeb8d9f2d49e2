// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::IsolationLevel;

/// Command-line arguments for `scriptagent`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scriptagent",
    version,
    about = "Run a script under a named isolation lock and stream its output.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the agent config file (TOML).
    ///
    /// Default: `scriptagent.toml` in the current working directory if it
    /// exists, otherwise built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Script to run. Its contents become the bootstrap script.
    #[arg(long, value_name = "PATH", required_unless_present = "dry_run")]
    pub script: Option<PathBuf>,

    /// Isolation level for this script.
    #[arg(long, value_enum, default_value_t = IsolationArg::None)]
    pub isolation: IsolationArg,

    /// Lock name; scripts only exclude each other under the same name.
    #[arg(long, value_name = "NAME")]
    pub mutex_name: Option<String>,

    /// Give up waiting for the lock after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub mutex_timeout_secs: Option<u64>,

    /// Task id reported to other scripts waiting on the same lock.
    #[arg(long, value_name = "ID")]
    pub task_id: Option<String>,

    /// Ticket for this run. A fresh one is generated when omitted.
    #[arg(long, value_name = "TICKET")]
    pub ticket: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SCRIPTAGENT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate configuration, print it, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Arguments passed through to the script.
    #[arg(last = true, value_name = "ARGS")]
    pub script_args: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    None,
    Full,
}

impl From<IsolationArg> for IsolationLevel {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::None => IsolationLevel::NoIsolation,
            IsolationArg::Full => IsolationLevel::FullIsolation,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
