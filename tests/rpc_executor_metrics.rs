mod common;
use crate::common::{TestResult, init_tracing};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scriptagent::rpc::{
    RpcCall, RpcCallExecutor, RpcCallNoRetriesHandler, RpcCallRetryHandler, RpcError,
    TransportError, TransportErrorKind,
};
use scriptagent_test_utils::recording_observer::RecordingObserver;

fn executor(observer: &RecordingObserver, abandon_after: Option<Duration>) -> RpcCallExecutor {
    RpcCallExecutor::new(
        RpcCallRetryHandler::new(Duration::from_secs(30)),
        RpcCallNoRetriesHandler::new(abandon_after),
        Arc::new(observer.clone()),
    )
}

fn call() -> RpcCall {
    RpcCall::new("ScriptService", "GetStatus")
}

#[tokio::test(start_paused = true)]
async fn retried_call_reports_every_attempt() -> TestResult {
    init_tracing();
    let observer = RecordingObserver::new();
    let executor = executor(&observer, None);
    let calls = Arc::new(AtomicU32::new(0));

    let value = executor
        .execute(
            true,
            &call(),
            |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TransportError::new(TransportErrorKind::ConnectionFailed, "refused").into())
                    } else {
                        Ok(42)
                    }
                }
            },
            &CancellationToken::new(),
        )
        .await?;
    assert_eq!(value, 42);

    let metrics = observer.single();
    assert_eq!(metrics.rpc_call, call());
    assert!(metrics.with_retries);
    assert_eq!(metrics.retry_timeout, Some(Duration::from_secs(30)));
    assert_eq!(metrics.attempt_count(), 2);
    assert!(metrics.succeeded);
    assert!(metrics.error.is_none());
    assert!(!metrics.was_cancelled);
    assert!(metrics.attempts[0].error.as_deref().is_some_and(|e| e.contains("refused")));
    Ok(())
}

#[tokio::test]
async fn failed_call_without_retries_is_reported_once() -> TestResult {
    init_tracing();
    let observer = RecordingObserver::new();
    let executor = executor(&observer, None);

    let result: Result<(), RpcError> = executor
        .execute(
            false,
            &call(),
            |_token| async { Err(RpcError::Other(anyhow::anyhow!("agent exploded"))) },
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(RpcError::Other(_))));

    let metrics = observer.single();
    assert!(!metrics.with_retries);
    assert_eq!(metrics.retry_timeout, None);
    assert_eq!(metrics.attempt_count(), 1);
    assert!(!metrics.succeeded);
    assert_eq!(metrics.error.as_deref(), Some("agent exploded"));
    Ok(())
}

#[tokio::test]
async fn abandoned_call_is_reported_as_cancelled() -> TestResult {
    init_tracing();
    let observer = RecordingObserver::new();
    let executor = executor(&observer, Some(Duration::from_millis(100)));
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let result: Result<(), RpcError> = executor
        .execute(false, &call(), |_token| std::future::pending(), &cancel)
        .await;
    assert!(matches!(result, Err(RpcError::Abandoned(_))));

    let metrics = observer.single();
    assert!(metrics.was_cancelled);
    assert!(!metrics.succeeded);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_retried_call_is_still_observed() -> TestResult {
    init_tracing();
    let observer = RecordingObserver::new();
    let executor = executor(&observer, None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result: Result<(), RpcError> = executor
        .execute(
            true,
            &call(),
            |token| async move {
                token.cancelled().await;
                Err(RpcError::Canceled)
            },
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(RpcError::Canceled)));

    let metrics = observer.single();
    assert!(metrics.was_cancelled);
    assert_eq!(metrics.attempt_count(), 1);
    Ok(())
}
