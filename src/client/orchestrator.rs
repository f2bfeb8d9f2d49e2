// src/client/orchestrator.rs

//! Drives one script on a remote agent from start to cleanup.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rpc::{ExponentialBackoff, RpcCall, RpcCallExecutor, RpcError};
use crate::scripts::{ProcessOutput, ScriptStatusResponse, StartScriptCommand};
use crate::types::{ProcessState, ScriptTicket};
use crate::wait;

use super::transport::ScriptServiceTransport;

const SERVICE_NAME: &str = "ScriptService";

/// Final outcome of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExecutionResult {
    pub ticket: ScriptTicket,
    pub state: ProcessState,
    pub exit_code: i32,
}

/// Starts a script, polls it to completion while streaming its output, and
/// completes it. Every remote call goes through the [`RpcCallExecutor`].
#[derive(Debug, Clone)]
pub struct ScriptExecutionOrchestrator {
    transport: Arc<dyn ScriptServiceTransport>,
    executor: RpcCallExecutor,
    retries_enabled: bool,
    polling: ExponentialBackoff,
}

impl ScriptExecutionOrchestrator {
    pub fn new(
        transport: Arc<dyn ScriptServiceTransport>,
        executor: RpcCallExecutor,
        retries_enabled: bool,
    ) -> Self {
        Self {
            transport,
            executor,
            retries_enabled,
            polling: ExponentialBackoff::POLLING,
        }
    }

    pub fn with_polling(mut self, polling: ExponentialBackoff) -> Self {
        self.polling = polling;
        self
    }

    /// Run `command` to completion.
    ///
    /// `on_logs` receives each batch of new output in order. Cancelling
    /// `cancel` after the script has started sends a cancel request and keeps
    /// observing until the agent reports the script complete; the calls made
    /// from then on are not tied to `cancel`.
    pub async fn execute<F>(
        &self,
        command: StartScriptCommand,
        mut on_logs: F,
        cancel: &CancellationToken,
    ) -> Result<ScriptExecutionResult, RpcError>
    where
        F: FnMut(&[ProcessOutput]),
    {
        let ticket = command.ticket.clone();
        let transport = &self.transport;

        let mut status = self
            .call("StartScript", cancel, |token| {
                transport.start_script(command.clone(), token)
            })
            .await?;
        let mut next_log_sequence = emit(&status, &mut on_logs, 0);
        info!(ticket = %ticket, state = %status.state, "script started on agent");

        // Calls after the start must outlive a caller cancellation so the
        // remote script can be stopped and observed to the end.
        let detached = CancellationToken::new();
        let mut cancel_sent = false;
        let mut poll_index = 0;

        while status.state != ProcessState::Complete {
            if cancel.is_cancelled() && !cancel_sent {
                info!(ticket = %ticket, "cancelling script on agent");
                status = self
                    .call("CancelScript", &detached, |token| {
                        transport.cancel_script(&ticket, next_log_sequence, token)
                    })
                    .await?;
                cancel_sent = true;
            } else {
                let delay = self.polling.delay(poll_index);
                poll_index += 1;
                if cancel_sent {
                    tokio::time::sleep(delay).await;
                } else if wait::sleep(delay, cancel).await.is_err() {
                    continue;
                }

                status = self
                    .call("GetStatus", &detached, |token| {
                        transport.get_status(&ticket, next_log_sequence, token)
                    })
                    .await?;
            }

            let before = next_log_sequence;
            next_log_sequence = emit(&status, &mut on_logs, next_log_sequence);
            if next_log_sequence != before {
                // Output is flowing; poll eagerly again.
                poll_index = 0;
            }
        }

        let completed = self
            .call("CompleteScript", &detached, |token| {
                transport.complete_script(&ticket, next_log_sequence, token)
            })
            .await?;
        emit(&completed, &mut on_logs, next_log_sequence);

        debug!(ticket = %ticket, exit_code = status.exit_code, "script finished on agent");
        Ok(ScriptExecutionResult {
            ticket,
            state: status.state,
            exit_code: status.exit_code,
        })
    }

    async fn call<F, Fut>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<ScriptStatusResponse, RpcError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<ScriptStatusResponse, RpcError>>,
    {
        let rpc_call = RpcCall::new(SERVICE_NAME, name);
        self.executor
            .execute(self.retries_enabled, &rpc_call, action, cancel)
            .await
    }
}

fn emit<F>(status: &ScriptStatusResponse, on_logs: &mut F, current: u64) -> u64
where
    F: FnMut(&[ProcessOutput]),
{
    if !status.logs.is_empty() {
        on_logs(&status.logs);
    }
    status.next_log_sequence.max(current)
}
