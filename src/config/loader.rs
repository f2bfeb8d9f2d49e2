// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{AgentConfig, RawAgentConfig};
use crate::errors::Result;

/// Load a configuration file and return the raw `RawAgentConfig`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] to get
/// a checked [`AgentConfig`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawAgentConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawAgentConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<AgentConfig> {
    let raw_config = load_from_path(&path)?;
    let config = AgentConfig::try_from(raw_config)?;
    Ok(config)
}

/// Load `path` if given, otherwise the default file if it exists, otherwise
/// use built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<AgentConfig> {
    if let Some(path) = path {
        return load_and_validate(path);
    }

    let default_path = default_config_path();
    if default_path.exists() {
        debug!(path = ?default_path, "using default config file");
        return load_and_validate(default_path);
    }

    AgentConfig::try_from(RawAgentConfig::default())
}

/// `scriptagent.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("scriptagent.toml")
}
