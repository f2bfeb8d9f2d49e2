// src/rpc/observer.rs

use std::fmt::Debug;

use tracing::{info, warn};

use super::metrics::RpcCallMetrics;

/// Receives the metrics of every completed call, successful or not.
pub trait RpcCallObserver: Send + Sync + Debug {
    fn rpc_call_completed(&self, metrics: &RpcCallMetrics);
}

/// Reports call metrics as structured tracing events.
#[derive(Debug, Clone, Default)]
pub struct TracingRpcCallObserver;

impl RpcCallObserver for TracingRpcCallObserver {
    fn rpc_call_completed(&self, metrics: &RpcCallMetrics) {
        let elapsed_ms = metrics.duration().as_millis() as u64;
        if metrics.succeeded {
            info!(
                rpc_call = %metrics.rpc_call,
                attempts = metrics.attempt_count(),
                elapsed_ms,
                with_retries = metrics.with_retries,
                "rpc call completed"
            );
        } else {
            warn!(
                rpc_call = %metrics.rpc_call,
                attempts = metrics.attempt_count(),
                elapsed_ms,
                with_retries = metrics.with_retries,
                cancelled = metrics.was_cancelled,
                error = metrics.error.as_deref().unwrap_or("unknown"),
                "rpc call failed"
            );
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopRpcCallObserver;

impl RpcCallObserver for NoopRpcCallObserver {
    fn rpc_call_completed(&self, _metrics: &RpcCallMetrics) {}
}
