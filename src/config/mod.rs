// src/config/mod.rs

//! Configuration loading and validation for the agent.
//!
//! - `model.rs`: the TOML-backed data model and the validated `AgentConfig`.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: raw → validated conversion with key-specific errors.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{AgentConfig, IsolationDefaults, RawAgentConfig, RpcSettings};
pub use validate::validate_config;
