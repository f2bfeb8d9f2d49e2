// src/client/transport.rs

use std::fmt::Debug;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::exec::job::client::BoxFuture;
use crate::rpc::RpcError;
use crate::scripts::{ScriptService, ScriptStatusResponse, StartScriptCommand};
use crate::types::ScriptTicket;

/// Remote surface of a script agent.
///
/// Each method is one request/response round trip. Implementations should
/// stop work when `cancel` fires and report [`RpcError::Canceled`], and must
/// classify connectivity failures as [`RpcError::Transport`] so the caller's
/// retry policy can act on them.
pub trait ScriptServiceTransport: Send + Sync + Debug {
    fn start_script<'a>(
        &'a self,
        command: StartScriptCommand,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>>;

    fn get_status<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>>;

    fn cancel_script<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>>;

    fn complete_script<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>>;
}

/// Transport that calls a [`ScriptService`] in the same process.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    service: Arc<ScriptService>,
}

impl InProcessTransport {
    pub fn new(service: Arc<ScriptService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ScriptService> {
        &self.service
    }
}

fn local_call<T>(
    cancel: &CancellationToken,
    call: impl FnOnce() -> crate::errors::Result<T>,
) -> Result<T, RpcError> {
    if cancel.is_cancelled() {
        return Err(RpcError::Canceled);
    }
    call().map_err(|err| RpcError::Other(err.into()))
}

impl ScriptServiceTransport for InProcessTransport {
    fn start_script<'a>(
        &'a self,
        command: StartScriptCommand,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RpcError::Canceled),
                result = self.service.start_script(command) => {
                    result.map_err(|err| RpcError::Other(err.into()))
                }
            }
        })
    }

    fn get_status<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>> {
        Box::pin(async move {
            local_call(&cancel, || self.service.get_status(ticket, last_log_sequence))
        })
    }

    fn cancel_script<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>> {
        Box::pin(async move {
            local_call(&cancel, || self.service.cancel_script(ticket, last_log_sequence))
        })
    }

    fn complete_script<'a>(
        &'a self,
        ticket: &'a ScriptTicket,
        last_log_sequence: u64,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ScriptStatusResponse, RpcError>> {
        Box::pin(async move {
            local_call(&cancel, || {
                self.service.complete_script(ticket, last_log_sequence)
            })
        })
    }
}
