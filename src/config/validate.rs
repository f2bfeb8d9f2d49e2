// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    AgentConfig, IsolationDefaults, RawAgentConfig, RpcSection, RpcSettings,
};
use crate::errors::{AgentError, Result};
use crate::exec::{ExecutionStrategy, Shell};
use crate::isolation::NO_TIMEOUT;
use crate::types::TimeoutStrategy;

impl TryFrom<RawAgentConfig> for AgentConfig {
    type Error = AgentError;

    fn try_from(raw: RawAgentConfig) -> std::result::Result<Self, Self::Error> {
        validate_agent(&raw)?;
        validate_isolation(&raw)?;
        validate_job(&raw)?;

        let shell = match &raw.shell.kind {
            Some(kind) => Some(
                kind.parse::<Shell>()
                    .map_err(|e| AgentError::Config(format!("[shell].kind: {e}")))?,
            ),
            None => None,
        };
        let job = raw.job.enabled.then_some(raw.job.settings);
        let strategy = ExecutionStrategy::select(shell, raw.shell.path, job);

        Ok(AgentConfig {
            workspace_root: raw.agent.workspace_root,
            task_id: raw.agent.task_id,
            sensitive_values: raw.agent.sensitive_values,
            isolation: IsolationDefaults {
                mutex_acquire_timeout: raw
                    .isolation
                    .mutex_acquire_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(NO_TIMEOUT),
                mutex_name: raw.isolation.mutex_name,
            },
            strategy,
            rpc: rpc_settings(&raw.rpc)?,
        })
    }
}

/// Validate `raw` without consuming it.
pub fn validate_config(raw: &RawAgentConfig) -> Result<()> {
    AgentConfig::try_from(raw.clone()).map(|_| ())
}

fn validate_agent(cfg: &RawAgentConfig) -> Result<()> {
    if cfg.agent.workspace_root.as_os_str().is_empty() {
        return Err(AgentError::Config(
            "[agent].workspace_root must not be empty".to_string(),
        ));
    }
    if cfg.agent.task_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(AgentError::Config(
            "[agent].task_id must not be blank when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_isolation(cfg: &RawAgentConfig) -> Result<()> {
    if cfg.isolation.mutex_name.trim().is_empty() {
        return Err(AgentError::Config(
            "[isolation].mutex_name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_job(cfg: &RawAgentConfig) -> Result<()> {
    if !cfg.job.enabled {
        return Ok(());
    }
    if cfg.job.settings.image.trim().is_empty() {
        return Err(AgentError::Config(
            "[job].image must be set when [job].enabled = true".to_string(),
        ));
    }
    if cfg.job.settings.status_poll_timeout.is_zero() {
        return Err(AgentError::Config(
            "[job].status_poll_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn rpc_settings(rpc: &RpcSection) -> Result<RpcSettings> {
    if rpc.retry_timeout_secs == 0 {
        return Err(AgentError::Config(
            "[rpc].retry_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    let timeout_strategy = rpc
        .timeout_strategy
        .parse::<TimeoutStrategy>()
        .map_err(|e| AgentError::Config(format!("[rpc].{e}")))?;

    Ok(RpcSettings {
        retries_enabled: rpc.retries_enabled,
        retry_timeout: Duration::from_secs(rpc.retry_timeout_secs),
        timeout_strategy,
        abandon_after: rpc.abandon_after_secs.map(Duration::from_secs),
    })
}
