// src/errors.rs

//! Crate-wide error type and `Result` alias.

use thiserror::Error;

use crate::isolation::IsolationError;
use crate::types::ProcessState;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error("Script state already exists at {0}")]
    StateAlreadyExists(String),

    #[error("Script state does not exist at {0}")]
    StateMissing(String),

    #[error("Invalid script state transition from {from:?} to {to:?}")]
    InvalidTransition { from: ProcessState, to: ProcessState },

    #[error("Unknown script ticket: {0}")]
    UnknownTicket(String),

    #[error("Invalid script ticket {0:?}: must be a single directory name")]
    InvalidTicket(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AgentError>;
