// src/wait.rs

//! Bounded, cancellable waiting.
//!
//! Every blocking wait in the agent (isolation polling, backoff sleeps, job
//! status polls, output tailing) accepts both an external
//! [`CancellationToken`] and a local deadline. Either can interrupt the wait
//! independently; cancellation wins when both are ready.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a bounded wait ended without the awaited future completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Canceled,
    TimedOut,
}

/// Await `fut`, giving up when `cancel` fires or `deadline` passes.
///
/// A `None` deadline waits without a local bound.
pub async fn bounded<F>(
    fut: F,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Canceled),
        out = fut => Ok(out),
        _ = sleep_until_opt(deadline) => Err(Interrupted::TimedOut),
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), Interrupted> {
    bounded(tokio::time::sleep(duration), None, cancel).await
}

/// `now + timeout`, or `None` when the sum is not representable (treated as
/// "no deadline").
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left until `deadline`, saturating at zero.
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Build a token that is cancelled when `parent` is cancelled or when
/// `timeout` elapses, whichever happens first.
///
/// Must be called from within a Tokio runtime when `timeout` is `Some`.
pub fn linked_token(parent: &CancellationToken, timeout: Option<Duration>) -> CancellationToken {
    let linked = parent.child_token();
    if let Some(timeout) = timeout {
        let timer = linked.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => timer.cancel(),
            }
        });
    }
    linked
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}
