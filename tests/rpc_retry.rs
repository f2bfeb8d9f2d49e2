mod common;
use crate::common::{TestResult, init_tracing};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scriptagent::rpc::{
    RetryListener, RpcCallNoRetriesHandler, RpcCallRetryHandler, RpcError, TimedOperation,
    TransportError, TransportErrorKind,
};
use scriptagent::types::TimeoutStrategy;

fn transient() -> RpcError {
    TransportError::new(TransportErrorKind::ConnectionReset, "connection reset by peer").into()
}

#[derive(Default)]
struct Recorded {
    attempts: Vec<TimedOperation>,
    retries: Vec<(u32, Duration)>,
    timeouts: Vec<u32>,
}

impl RetryListener for Recorded {
    fn on_attempt(&mut self, attempt: &TimedOperation) {
        self.attempts.push(attempt.clone());
    }

    fn on_retry(
        &mut self,
        _last_error: &RpcError,
        sleep: Duration,
        retry_count: u32,
        _retry_timeout: Duration,
        _elapsed: Duration,
    ) {
        self.retries.push((retry_count, sleep));
    }

    fn on_timeout(&mut self, _retry_timeout: Duration, _elapsed: Duration, retry_count: u32) {
        self.timeouts.push(retry_count);
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_until_success() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicU32::new(0));
    let mut recorded = Recorded::default();

    let result = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient())
                    } else {
                        Ok("pong")
                    }
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(result, "pong");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(recorded.attempts.len(), 2);
    assert!(!recorded.attempts[0].succeeded);
    assert!(recorded.attempts[1].succeeded);
    assert_eq!(recorded.retries, vec![(1, Duration::from_millis(300))]);
    assert!(recorded.timeouts.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicU32::new(0));
    let mut recorded = Recorded::default();

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::new(
                        TransportErrorKind::NoMatchingServiceOrMethod,
                        "ScriptServiceV3 is not available",
                    )
                    .into())
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await;

    match result {
        Err(RpcError::Transport(err)) => {
            assert_eq!(err.kind, TransportErrorKind::NoMatchingServiceOrMethod)
        }
        other => panic!("expected permanent transport error, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(recorded.retries.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_surfaces_the_last_retryable_error() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(3));
    let calls = Arc::new(AtomicU32::new(0));
    let mut recorded = Recorded::default();
    let started = tokio::time::Instant::now();

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(RpcError::Transport(_))));
    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert_eq!(recorded.timeouts.len(), 1);

    // Retry counts are 1-based and contiguous; sleeps follow the curve.
    let counts: Vec<u32> = recorded.retries.iter().map(|(n, _)| *n).collect();
    let expected: Vec<u32> = (1..=counts.len() as u32).collect();
    assert_eq!(counts, expected);
    assert!(recorded.retries.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(recorded.timeouts[0], counts.len() as u32);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn hung_retry_attempt_is_bounded_by_the_remaining_budget() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(5))
        .with_timeout_strategy(TimeoutStrategy::Pessimistic);
    let calls = Arc::new(AtomicU32::new(0));
    let mut recorded = Recorded::default();
    let started = tokio::time::Instant::now();

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient())
                    } else {
                        std::future::pending().await
                    }
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(RpcError::Transport(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(recorded.timeouts, vec![1]);
    assert!(recorded.attempts[1].was_cancelled);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn optimistic_strategy_keeps_a_late_success() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(5))
        .with_timeout_strategy(TimeoutStrategy::Optimistic);
    let calls = Arc::new(AtomicU32::new(0));
    let cancelled_mid_flight = Arc::new(AtomicBool::new(false));
    let mut recorded = Recorded::default();

    let result = handler
        .execute_with_retries(
            |token| {
                let calls = Arc::clone(&calls);
                let cancelled_mid_flight = Arc::clone(&cancelled_mid_flight);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(transient());
                    }
                    // Runs well past the remaining budget.
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    cancelled_mid_flight.store(token.is_cancelled(), Ordering::SeqCst);
                    Ok(7)
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(result, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!cancelled_mid_flight.load(Ordering::SeqCst));
    assert!(recorded.timeouts.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn optimistic_strategy_stops_retrying_after_a_late_failure() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(5))
        .with_timeout_strategy(TimeoutStrategy::Optimistic);
    let calls = Arc::new(AtomicU32::new(0));
    let cancelled_mid_flight = Arc::new(AtomicBool::new(false));
    let mut recorded = Recorded::default();
    let started = tokio::time::Instant::now();

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |token| {
                let calls = Arc::clone(&calls);
                let cancelled_mid_flight = Arc::clone(&cancelled_mid_flight);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(transient());
                    }
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    cancelled_mid_flight.store(token.is_cancelled(), Ordering::SeqCst);
                    Err(transient())
                }
            },
            &mut recorded,
            &CancellationToken::new(),
        )
        .await;

    // The attempt ran to the end; the budget was only checked afterwards.
    assert!(matches!(result, Err(RpcError::Transport(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(!cancelled_mid_flight.load(Ordering::SeqCst));
    assert_eq!(recorded.timeouts, vec![1]);
    assert!(!recorded.attempts[1].was_cancelled);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_wins_over_a_retryable_error() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                let cancel = cancel.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    cancel.cancel();
                    Err(transient())
                }
            },
            &mut (),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(RpcError::Canceled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_sleep_stops_retrying() -> TestResult {
    init_tracing();
    let handler = RpcCallRetryHandler::new(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let result: Result<(), RpcError> = handler
        .execute_with_retries(
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
            &mut (),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(RpcError::Canceled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn no_retries_handler_returns_the_first_outcome() -> TestResult {
    init_tracing();
    let handler = RpcCallNoRetriesHandler::new(None);

    let result: Result<(), RpcError> = handler
        .execute_with_no_retries(|_token| async { Err(transient()) }, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RpcError::Transport(_))));
    Ok(())
}

#[tokio::test]
async fn no_retries_handler_abandons_an_action_that_ignores_cancellation() -> TestResult {
    init_tracing();
    let handler = RpcCallNoRetriesHandler::new(Some(Duration::from_millis(200)));
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let started = std::time::Instant::now();
    let result: Result<(), RpcError> = handler
        .execute_with_no_retries(|_token| std::future::pending(), &cancel)
        .await;

    assert!(matches!(result, Err(RpcError::Abandoned(d)) if d == Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn no_retries_handler_waits_for_a_cooperative_action() -> TestResult {
    init_tracing();
    let handler = RpcCallNoRetriesHandler::new(Some(Duration::from_secs(2)));
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let result: Result<(), RpcError> = handler
        .execute_with_no_retries(
            |token| async move {
                token.cancelled().await;
                Err(RpcError::Canceled)
            },
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(RpcError::Canceled)));
    Ok(())
}
