// src/isolation/mutex.rs

//! Polling acquisition of named isolation locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::messages::{busy_message, canceled_message, timed_out_message};
use super::registry::{LockRegistry, TaskLock};
use super::IsolationError;
use crate::types::IsolationLevel;
use crate::wait::{self, Interrupted};

/// How long the first attempt waits before the task reports itself as busy.
pub const INITIAL_WAIT: Duration = Duration::from_millis(100);

/// Upper bound for each subsequent wait; the loop re-polls at least this often.
pub const POLL_WAIT: Duration = Duration::from_secs(10 * 60);

/// Entry point for acquiring isolation locks from a shared [`LockRegistry`].
#[derive(Debug, Clone)]
pub struct IsolationMutex {
    registry: Arc<LockRegistry>,
}

impl IsolationMutex {
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Acquire `lock_name` at the given isolation level on behalf of
    /// `task_id`.
    ///
    /// Blocks until the lock is granted, `timeout` elapses
    /// ([`IsolationError::TimedOut`]) or `cancel` fires
    /// ([`IsolationError::Canceled`]). While waiting, `task_log` receives
    /// human-readable messages naming the tasks currently holding the lock.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn acquire<L>(
        &self,
        level: IsolationLevel,
        timeout: Duration,
        lock_name: &str,
        task_id: &str,
        cancel: &CancellationToken,
        task_log: L,
    ) -> Result<IsolationGuard, IsolationError>
    where
        L: Fn(&str),
    {
        let lock = self.registry.lock_for(lock_name);
        let attempt = Attempt {
            lock: &lock,
            level,
            lock_name,
            task_id,
        };

        attempt.trace("Trying to acquire lock.");
        let deadline = wait::deadline_after(timeout);

        let outcome = attempt.acquire(timeout, deadline, cancel, &task_log).await;

        match outcome {
            Ok(()) => {
                attempt.trace("Lock taken.");
                Ok(IsolationGuard {
                    registry: Arc::clone(&self.registry),
                    lock: Some(lock),
                    lock_name: lock_name.to_string(),
                    task_id: task_id.to_string(),
                    level,
                })
            }
            Err(err) => {
                drop(lock);
                self.registry.remove_if_idle(lock_name);
                Err(err)
            }
        }
    }
}

enum Poll {
    Entered,
    Busy,
    Canceled,
}

struct Attempt<'a> {
    lock: &'a Arc<TaskLock>,
    level: IsolationLevel,
    lock_name: &'a str,
    task_id: &'a str,
}

impl Attempt<'_> {
    async fn acquire<L>(
        &self,
        timeout: Duration,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        task_log: &L,
    ) -> Result<(), IsolationError>
    where
        L: Fn(&str),
    {
        if cancel.is_cancelled() {
            return Err(self.canceled(task_log));
        }

        match self.wait_once(INITIAL_WAIT, deadline, cancel).await {
            Poll::Entered => return Ok(()),
            Poll::Busy => {}
            Poll::Canceled => return Err(self.canceled(task_log)),
        }

        self.trace(&format!("Failed to acquire lock within {INITIAL_WAIT:?}."));
        task_log(&busy_message(
            &self.lock.snapshot(),
            self.task_id,
            self.level == IsolationLevel::FullIsolation,
        ));

        loop {
            if wait::remaining(deadline).is_some_and(|left| left.is_zero()) {
                return Err(self.timed_out(timeout, task_log));
            }

            self.trace(&format!(
                "Trying to acquire lock with wait time of {:?}.",
                wait::remaining(deadline).unwrap_or(POLL_WAIT).min(POLL_WAIT)
            ));
            match self.wait_once(POLL_WAIT, deadline, cancel).await {
                Poll::Entered => return Ok(()),
                Poll::Busy => continue,
                Poll::Canceled => return Err(self.canceled(task_log)),
            }
        }
    }

    /// Try to take the lock, waiting at most `wait` and never beyond
    /// `deadline`.
    async fn wait_once(
        &self,
        wait: Duration,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Poll {
        let wait_deadline = match (wait::deadline_after(wait), deadline) {
            (Some(w), Some(d)) => Some(w.min(d)),
            (w, d) => w.or(d),
        };

        loop {
            // Register for the release signal before checking, so a release
            // between the check and the wait is not missed.
            let notified = self.lock.released().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock.try_enter(self.level, self.task_id) {
                return Poll::Entered;
            }

            match wait::bounded(notified.as_mut(), wait_deadline, cancel).await {
                Ok(()) => continue,
                Err(Interrupted::TimedOut) => {
                    // One last look right at the boundary.
                    return if self.lock.try_enter(self.level, self.task_id) {
                        Poll::Entered
                    } else {
                        Poll::Busy
                    };
                }
                Err(Interrupted::Canceled) => return Poll::Canceled,
            }
        }
    }

    fn canceled<L: Fn(&str)>(&self, task_log: &L) -> IsolationError {
        self.trace("Lock acquire canceled.");
        task_log(&canceled_message(&self.lock.snapshot(), self.task_id));
        IsolationError::Canceled {
            lock_name: self.lock_name.to_string(),
        }
    }

    fn timed_out<L: Fn(&str)>(&self, timeout: Duration, task_log: &L) -> IsolationError {
        self.trace(&format!("Failed to acquire lock within {timeout:?}."));
        task_log(&timed_out_message(&self.lock.snapshot(), timeout, self.task_id));
        IsolationError::TimedOut {
            lock_name: self.lock_name.to_string(),
            lock_type: lock_type(self.level),
            timeout,
        }
    }

    fn trace(&self, message: &str) {
        trace!(
            task_id = %self.task_id,
            lock_name = %self.lock_name,
            lock_type = lock_type(self.level),
            holders = %self.lock.snapshot().report(),
            "{message}"
        );
    }
}

fn lock_type(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::FullIsolation => "write lock",
        IsolationLevel::NoIsolation => "read lock",
    }
}

/// Scoped ownership of an isolation lock.
///
/// Dropping the guard releases the lock; [`IsolationGuard::release`] may be
/// called earlier and any number of times.
#[derive(Debug)]
pub struct IsolationGuard {
    registry: Arc<LockRegistry>,
    lock: Option<Arc<TaskLock>>,
    lock_name: String,
    task_id: String,
    level: IsolationLevel,
}

impl IsolationGuard {
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release(self.level, &self.task_id);
            trace!(
                task_id = %self.task_id,
                lock_name = %self.lock_name,
                lock_type = lock_type(self.level),
                holders = %lock.snapshot().report(),
                "Releasing lock."
            );
            drop(lock);
            self.registry.remove_if_idle(&self.lock_name);
        }
    }
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        self.release();
    }
}
