// src/rpc/error.rs

//! Error taxonomy of remote calls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Transport-level failure categories reported by the RPC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionFailed,
    ConnectionReset,
    RequestTimedOut,
    /// The remote side does not implement the requested service or method.
    /// This is a contract mismatch that no retry can fix.
    NoMatchingServiceOrMethod,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportErrorKind::ConnectionFailed => "connection failed",
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::RequestTimedOut => "request timed out",
            TransportErrorKind::NoMatchingServiceOrMethod => "no matching service or method",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Permanent failures are never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, TransportErrorKind::NoMatchingServiceOrMethod)
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("the call was canceled")]
    Canceled,

    #[error("the call did not complete within {0:?}")]
    TimedOut(Duration),

    #[error("the call did not stop within {0:?} of being canceled and was abandoned")]
    Abandoned(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RpcError {
    /// Only non-permanent transport failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(e) if !e.is_permanent())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RpcError::Canceled | RpcError::Abandoned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let transient = RpcError::from(TransportError::new(TransportErrorKind::ConnectionReset, "x"));
        let permanent = RpcError::from(TransportError::new(
            TransportErrorKind::NoMatchingServiceOrMethod,
            "x",
        ));
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!RpcError::Other(anyhow::anyhow!("boom")).is_retryable());
        assert!(!RpcError::Canceled.is_retryable());
    }
}
