// src/rpc/metrics.rs

//! Per-call and per-attempt timing records.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::RpcError;

/// Identifies a remote operation, e.g. `ScriptService.GetStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcCall {
    pub service: String,
    pub name: String,
}

impl RpcCall {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RpcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.name)
    }
}

/// One attempt of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOperation {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub succeeded: bool,
    pub error: Option<String>,
    pub was_cancelled: bool,
}

impl TimedOperation {
    pub fn success(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Utc::now(),
            succeeded: true,
            error: None,
            was_cancelled: false,
        }
    }

    pub fn failure(start: DateTime<Utc>, error: &RpcError, was_cancelled: bool) -> Self {
        Self {
            start,
            end: Utc::now(),
            succeeded: false,
            error: Some(error.to_string()),
            was_cancelled,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }
}

/// Summary of a call, composed of its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCallMetrics {
    pub rpc_call: RpcCall,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// True iff the last attempt succeeded.
    pub succeeded: bool,
    pub error: Option<String>,
    pub was_cancelled: bool,
    pub with_retries: bool,
    pub retry_timeout: Option<Duration>,
    pub attempts: Vec<TimedOperation>,
}

impl RpcCallMetrics {
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

#[derive(Debug)]
pub struct RpcCallMetricsBuilder {
    rpc_call: RpcCall,
    start: DateTime<Utc>,
    with_retries: bool,
    retry_timeout: Option<Duration>,
    attempts: Vec<TimedOperation>,
    error: Option<String>,
    was_cancelled: bool,
}

impl RpcCallMetricsBuilder {
    pub fn start_with_retries(rpc_call: RpcCall, retry_timeout: Duration) -> Self {
        Self::start(rpc_call, true, Some(retry_timeout))
    }

    pub fn start_without_retries(rpc_call: RpcCall) -> Self {
        Self::start(rpc_call, false, None)
    }

    fn start(rpc_call: RpcCall, with_retries: bool, retry_timeout: Option<Duration>) -> Self {
        Self {
            rpc_call,
            start: Utc::now(),
            with_retries,
            retry_timeout,
            attempts: Vec::new(),
            error: None,
            was_cancelled: false,
        }
    }

    pub fn with_attempt(&mut self, attempt: TimedOperation) -> &mut Self {
        self.attempts.push(attempt);
        self
    }

    pub fn failure(&mut self, error: &RpcError, was_cancelled: bool) -> &mut Self {
        self.error = Some(error.to_string());
        self.was_cancelled = was_cancelled;
        self
    }

    pub fn build(self) -> RpcCallMetrics {
        let succeeded = self.attempts.last().is_some_and(|a| a.succeeded);
        RpcCallMetrics {
            rpc_call: self.rpc_call,
            start: self.start,
            end: Utc::now(),
            succeeded,
            error: self.error,
            was_cancelled: self.was_cancelled,
            with_retries: self.with_retries,
            retry_timeout: self.retry_timeout,
            attempts: self.attempts,
        }
    }
}
