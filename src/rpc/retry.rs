// src/rpc/retry.rs

//! Retry loop around a single asynchronous remote call.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::TimeoutStrategy;
use crate::wait::{self, Interrupted};

use super::backoff::ExponentialBackoff;
use super::error::RpcError;
use super::metrics::TimedOperation;

/// A retry is only attempted if at least this much of the retry budget is
/// left after the backoff sleep.
pub const RETRY_IF_REMAINING_AT_LEAST: Duration = Duration::from_secs(1);

/// Hooks into the retry loop. All methods default to doing nothing.
pub trait RetryListener {
    /// Called after every attempt, including the initial one.
    fn on_attempt(&mut self, _attempt: &TimedOperation) {}

    /// Called before sleeping ahead of retry number `retry_count` (1-based).
    fn on_retry(
        &mut self,
        _last_error: &RpcError,
        _sleep: Duration,
        _retry_count: u32,
        _retry_timeout: Duration,
        _elapsed: Duration,
    ) {
    }

    /// Called once when the retry budget is exhausted.
    fn on_timeout(&mut self, _retry_timeout: Duration, _elapsed: Duration, _retry_count: u32) {}
}

impl RetryListener for () {}

enum AttemptOutcome<T> {
    Finished(Result<T, RpcError>),
    TimedOut,
}

/// Retries transient transport failures with backoff, within a total time
/// budget.
///
/// - The initial attempt runs unbounded; each retry is bounded by whatever is
///   left of `retry_timeout`.
/// - Only [`RpcError::is_retryable`] errors are retried. Anything else is
///   returned unchanged after the first attempt.
/// - Once `cancel` has fired the result is [`RpcError::Canceled`], whatever
///   the last attempt returned.
/// - When the budget runs out after a retryable failure, the most recent
///   retryable error is returned.
///
/// With [`TimeoutStrategy::Pessimistic`] an attempt that overruns its budget
/// has its token cancelled and is dropped at the deadline. Dropping only
/// stops the future itself: work it handed to other tasks or threads is not
/// stopped and may keep running in the background.
#[derive(Debug, Clone)]
pub struct RpcCallRetryHandler {
    retry_timeout: Duration,
    backoff: ExponentialBackoff,
    strategy: TimeoutStrategy,
}

impl RpcCallRetryHandler {
    pub fn new(retry_timeout: Duration) -> Self {
        Self {
            retry_timeout,
            backoff: ExponentialBackoff::DEFAULT,
            strategy: TimeoutStrategy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout_strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    pub fn timeout_strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    pub async fn execute_with_retries<T, F, Fut, L>(
        &self,
        mut action: F,
        listener: &mut L,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
        L: RetryListener + ?Sized,
    {
        let started = Instant::now();
        let mut retry_count = 0u32;
        let mut last_error: Option<RpcError> = None;

        let mut outcome = self.attempt(&mut action, None, listener, cancel).await;

        loop {
            let error = match outcome {
                AttemptOutcome::Finished(Ok(value)) => return Ok(value),
                AttemptOutcome::Finished(Err(error)) => error,
                AttemptOutcome::TimedOut => {
                    listener.on_timeout(self.retry_timeout, started.elapsed(), retry_count);
                    return Err(self.exhausted(last_error));
                }
            };

            if cancel.is_cancelled() {
                return Err(RpcError::Canceled);
            }
            if !error.is_retryable() {
                return Err(error);
            }

            let sleep = self.backoff.delay(retry_count);
            let elapsed = started.elapsed();
            if !self.worth_retrying(elapsed + sleep) {
                listener.on_timeout(self.retry_timeout, elapsed, retry_count);
                return Err(error);
            }

            retry_count += 1;
            debug!(
                retry_count,
                sleep_ms = sleep.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %error,
                "retrying rpc call"
            );
            listener.on_retry(&error, sleep, retry_count, self.retry_timeout, elapsed);
            last_error = Some(error);

            if wait::sleep(sleep, cancel).await.is_err() {
                return Err(RpcError::Canceled);
            }

            let elapsed = started.elapsed();
            if !self.worth_retrying(elapsed) {
                listener.on_timeout(self.retry_timeout, elapsed, retry_count);
                return Err(self.exhausted(last_error));
            }
            let budget = self.retry_timeout.saturating_sub(elapsed);
            outcome = self.attempt(&mut action, Some(budget), listener, cancel).await;
        }
    }

    fn worth_retrying(&self, spent: Duration) -> bool {
        self.retry_timeout.saturating_sub(spent) > RETRY_IF_REMAINING_AT_LEAST
    }

    fn exhausted(&self, last_error: Option<RpcError>) -> RpcError {
        last_error.unwrap_or(RpcError::TimedOut(self.retry_timeout))
    }

    async fn attempt<T, F, Fut, L>(
        &self,
        action: &mut F,
        budget: Option<Duration>,
        listener: &mut L,
        cancel: &CancellationToken,
    ) -> AttemptOutcome<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
        L: RetryListener + ?Sized,
    {
        let start = Utc::now();
        let (token, outcome) = match self.strategy {
            TimeoutStrategy::Pessimistic => {
                let token = wait::linked_token(cancel, budget);
                let deadline = budget.and_then(wait::deadline_after);
                let outcome = match wait::bounded(action(token.clone()), deadline, cancel).await {
                    Ok(result) => AttemptOutcome::Finished(result),
                    Err(Interrupted::Canceled) => AttemptOutcome::Finished(Err(RpcError::Canceled)),
                    Err(Interrupted::TimedOut) => AttemptOutcome::TimedOut,
                };
                (token, outcome)
            }
            TimeoutStrategy::Optimistic => {
                // Only the caller can cancel. The retry loop checks the
                // budget once the attempt returns.
                let token = cancel.child_token();
                let outcome = AttemptOutcome::Finished(action(token.clone()).await);
                (token, outcome)
            }
        };

        let record = match &outcome {
            AttemptOutcome::Finished(Ok(_)) => TimedOperation::success(start),
            AttemptOutcome::Finished(Err(err)) => {
                TimedOperation::failure(start, err, token.is_cancelled())
            }
            AttemptOutcome::TimedOut => TimedOperation::failure(
                start,
                &RpcError::TimedOut(budget.unwrap_or(self.retry_timeout)),
                true,
            ),
        };
        // Also stops the deadline timer behind a linked token.
        token.cancel();
        listener.on_attempt(&record);
        outcome
    }
}

/// One-shot execution, optionally walking away from an action that ignores
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct RpcCallNoRetriesHandler {
    abandon_after: Option<Duration>,
}

impl RpcCallNoRetriesHandler {
    /// With `abandon_after`, once `cancel` fires the action gets that long to
    /// finish before the call fails with [`RpcError::Abandoned`]. As with the
    /// pessimistic retry strategy, work the action spawned elsewhere may keep
    /// running.
    pub fn new(abandon_after: Option<Duration>) -> Self {
        Self { abandon_after }
    }

    pub async fn execute_with_no_retries<T, F, Fut>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let fut = action(cancel.clone());
        let Some(abandon_after) = self.abandon_after else {
            return fut.await;
        };

        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => return result,
            _ = cancel.cancelled() => {}
        }

        match tokio::time::timeout(abandon_after, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(abandon_after_ms = abandon_after.as_millis() as u64, "abandoning rpc call");
                Err(RpcError::Abandoned(abandon_after))
            }
        }
    }
}
