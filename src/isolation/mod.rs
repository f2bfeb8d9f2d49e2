// src/isolation/mod.rs

//! Named reader/writer isolation lock for script execution.
//!
//! Scripts tagged "no isolation" take a shared (read) lock and may run
//! concurrently; scripts tagged "full isolation" take an exclusive (write)
//! lock. Locks are scoped by name, typically one per target machine identity.
//!
//! - [`registry`] owns the process-wide table of lock names and per-name
//!   holder bookkeeping.
//! - [`mutex`] implements polling acquisition with timeout and cancellation,
//!   returning a guard that releases on drop.
//! - [`messages`] renders operator-facing "why is this waiting" text from the
//!   current holders.
//!
//! There is no fairness between waiting readers and writers: every poll,
//! whoever gets there first wins.

pub mod messages;
pub mod mutex;
pub mod registry;

use std::time::Duration;

use thiserror::Error;

pub use mutex::{IsolationGuard, IsolationMutex};
pub use registry::{LockHolders, LockRegistry};

/// Typed failures of an isolation lock acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    #[error("could not acquire {lock_type} on '{lock_name}' within {timeout:?}")]
    TimedOut {
        lock_name: String,
        lock_type: &'static str,
        timeout: Duration,
    },

    #[error("acquisition of '{lock_name}' was canceled")]
    Canceled { lock_name: String },
}

/// Timeout meaning "wait for as long as it takes".
pub const NO_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);
