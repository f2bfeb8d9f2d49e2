// src/rpc/mod.rs

//! Resilient execution of calls to a remote agent.
//!
//! - [`backoff`]: capped exponential delay curves.
//! - [`error`]: the error taxonomy that drives retry decisions.
//! - [`retry`]: the retry loop with its two timeout strategies, plus the
//!   one-shot handler that can abandon an uncooperative action.
//! - [`executor`]: wraps both handlers and reports per-call metrics.
//! - [`metrics`] / [`observer`]: the metrics shapes and their consumers.

pub mod backoff;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observer;
pub mod retry;

pub use backoff::ExponentialBackoff;
pub use error::{RpcError, TransportError, TransportErrorKind};
pub use executor::RpcCallExecutor;
pub use metrics::{RpcCall, RpcCallMetrics, RpcCallMetricsBuilder, TimedOperation};
pub use observer::{NoopRpcCallObserver, RpcCallObserver, TracingRpcCallObserver};
pub use retry::{RetryListener, RpcCallNoRetriesHandler, RpcCallRetryHandler};
