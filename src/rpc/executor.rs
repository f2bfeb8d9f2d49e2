// src/rpc/executor.rs

//! Observed execution of remote calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::RpcError;
use super::metrics::{RpcCall, RpcCallMetricsBuilder, TimedOperation};
use super::observer::RpcCallObserver;
use super::retry::{RetryListener, RpcCallNoRetriesHandler, RpcCallRetryHandler};

/// Runs remote calls through the retry handler (or the one-shot handler)
/// and reports one [`RpcCallMetrics`](super::RpcCallMetrics) per call to the
/// observer, whatever the outcome.
#[derive(Debug, Clone)]
pub struct RpcCallExecutor {
    retry_handler: RpcCallRetryHandler,
    no_retries_handler: RpcCallNoRetriesHandler,
    observer: Arc<dyn RpcCallObserver>,
}

/// Feeds retry-loop events into the metrics builder and the operator log.
struct MetricsListener<'a> {
    rpc_call: &'a RpcCall,
    metrics: RpcCallMetricsBuilder,
}

impl RetryListener for MetricsListener<'_> {
    fn on_attempt(&mut self, attempt: &TimedOperation) {
        self.metrics.with_attempt(attempt.clone());
    }

    fn on_retry(
        &mut self,
        last_error: &RpcError,
        sleep: Duration,
        retry_count: u32,
        retry_timeout: Duration,
        elapsed: Duration,
    ) {
        let remaining = retry_timeout.saturating_sub(elapsed).as_secs();
        info!(
            rpc_call = %self.rpc_call,
            "An error occurred communicating with the agent. This action will be retried after {} seconds. Retry attempt {}. Retries will be performed for up to {} seconds.",
            sleep.as_secs(),
            retry_count,
            remaining
        );
        debug!(rpc_call = %self.rpc_call, error = %last_error, "retryable rpc failure");
    }

    fn on_timeout(&mut self, _retry_timeout: Duration, elapsed: Duration, retry_count: u32) {
        if retry_count > 0 {
            info!(
                rpc_call = %self.rpc_call,
                "Could not communicate with the agent after {} seconds. No more retries will be attempted.",
                elapsed.as_secs()
            );
        } else {
            info!(
                rpc_call = %self.rpc_call,
                "Could not communicate with the agent after {} seconds.",
                elapsed.as_secs()
            );
        }
    }
}

impl RpcCallExecutor {
    pub fn new(
        retry_handler: RpcCallRetryHandler,
        no_retries_handler: RpcCallNoRetriesHandler,
        observer: Arc<dyn RpcCallObserver>,
    ) -> Self {
        Self {
            retry_handler,
            no_retries_handler,
            observer,
        }
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_handler.retry_timeout()
    }

    pub async fn execute<T, F, Fut>(
        &self,
        retries_enabled: bool,
        rpc_call: &RpcCall,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        if retries_enabled {
            self.execute_with_retries(rpc_call, action, cancel).await
        } else {
            self.execute_with_no_retries(rpc_call, action, cancel).await
        }
    }

    pub async fn execute_with_retries<T, F, Fut>(
        &self,
        rpc_call: &RpcCall,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut listener = MetricsListener {
            rpc_call,
            metrics: RpcCallMetricsBuilder::start_with_retries(
                rpc_call.clone(),
                self.retry_handler.retry_timeout(),
            ),
        };

        let result = self
            .retry_handler
            .execute_with_retries(action, &mut listener, cancel)
            .await;

        let mut metrics = listener.metrics;
        if let Err(err) = &result {
            metrics.failure(err, cancel.is_cancelled());
        }
        self.observer.rpc_call_completed(&metrics.build());
        result
    }

    pub async fn execute_with_no_retries<T, F, Fut>(
        &self,
        rpc_call: &RpcCall,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut metrics = RpcCallMetricsBuilder::start_without_retries(rpc_call.clone());
        let start = Utc::now();

        let result = self
            .no_retries_handler
            .execute_with_no_retries(action, cancel)
            .await;

        match &result {
            Ok(_) => {
                metrics.with_attempt(TimedOperation::success(start));
            }
            Err(err) => {
                let cancelled = cancel.is_cancelled();
                metrics
                    .with_attempt(TimedOperation::failure(start, err, cancelled))
                    .failure(err, cancelled);
            }
        }
        self.observer.rpc_call_completed(&metrics.build());
        result
    }
}
