// src/isolation/registry.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use crate::types::IsolationLevel;

/// Current holders of one named lock.
///
/// Either a single writer, or any number of readers with a per-task
/// reference count. Both are never populated at the same time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockHolders {
    writer: Option<String>,
    readers: BTreeMap<String, usize>,
}

impl LockHolders {
    pub fn writer(&self) -> Option<&str> {
        self.writer.as_deref()
    }

    /// Reader task ids in sorted order.
    pub fn reader_ids(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }

    /// How many outstanding read acquisitions `task_id` holds.
    pub fn read_count(&self, task_id: &str) -> usize {
        self.readers.get(task_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }

    /// Short summary used in trace logs.
    pub fn report(&self) -> String {
        if let Some(writer) = &self.writer {
            return format!("\"{writer}\" (has a write lock)");
        }

        match self.readers.len() {
            0 => "no locks".to_string(),
            1 => format!("\"{}\" (has a read lock)", self.joined_readers()),
            _ => format!("\"{}\" (have read locks)", self.joined_readers()),
        }
    }

    fn joined_readers(&self) -> String {
        self.readers.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Per-name lock state plus a wake-up signal for pollers.
#[derive(Debug, Default)]
pub(crate) struct TaskLock {
    holders: Mutex<LockHolders>,
    released: Notify,
}

impl TaskLock {
    pub(crate) fn try_enter(&self, level: IsolationLevel, task_id: &str) -> bool {
        let mut holders = self.holders();
        match level {
            IsolationLevel::FullIsolation => {
                if holders.writer.is_some() || !holders.readers.is_empty() {
                    return false;
                }
                holders.writer = Some(task_id.to_string());
                true
            }
            IsolationLevel::NoIsolation => {
                if holders.writer.is_some() {
                    return false;
                }
                *holders.readers.entry(task_id.to_string()).or_insert(0) += 1;
                true
            }
        }
    }

    pub(crate) fn release(&self, level: IsolationLevel, task_id: &str) {
        {
            let mut holders = self.holders();
            match level {
                IsolationLevel::FullIsolation => {
                    if holders.writer.as_deref() == Some(task_id) {
                        holders.writer = None;
                    }
                }
                IsolationLevel::NoIsolation => {
                    if let Some(count) = holders.readers.get_mut(task_id) {
                        *count -= 1;
                        if *count == 0 {
                            holders.readers.remove(task_id);
                        }
                    }
                }
            }
        }
        self.released.notify_waiters();
    }

    pub(crate) fn released(&self) -> &Notify {
        &self.released
    }

    pub(crate) fn snapshot(&self) -> LockHolders {
        self.holders().clone()
    }

    fn holders(&self) -> MutexGuard<'_, LockHolders> {
        // The holder table is always left consistent, so a poisoned lock is
        // still safe to use.
        self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide table of named isolation locks.
///
/// Owned by the composition root and shared via `Arc`; tests construct their
/// own registries. Entries are created lazily on first use of a name and
/// dropped once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<TaskLock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current holders of `lock_name`, if it is in use.
    pub fn holders(&self, lock_name: &str) -> Option<LockHolders> {
        self.table().get(lock_name).map(|lock| lock.snapshot())
    }

    /// Number of lock names currently tracked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Drop every tracked lock name, reporting any that are still held.
    ///
    /// Intended for host shutdown; guards outstanding at that point keep
    /// their own reference and release harmlessly.
    pub fn shutdown(&self) {
        let mut table = self.table();
        for (name, lock) in table.drain() {
            let holders = lock.snapshot();
            if !holders.is_empty() {
                debug!(lock_name = %name, holders = %holders.report(), "lock still held at shutdown");
            }
        }
    }

    pub(crate) fn lock_for(&self, lock_name: &str) -> Arc<TaskLock> {
        let mut table = self.table();
        Arc::clone(
            table
                .entry(lock_name.to_string())
                .or_insert_with(|| Arc::new(TaskLock::default())),
        )
    }

    /// Forget `lock_name` if nobody holds it and no other reference to its
    /// state exists. Callers must drop their own `Arc<TaskLock>` first.
    pub(crate) fn remove_if_idle(&self, lock_name: &str) {
        let mut table = self.table();
        let idle = table
            .get(lock_name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1 && lock.snapshot().is_empty());
        if idle {
            table.remove(lock_name);
            debug!(lock_name = %lock_name, "removed idle isolation lock");
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<TaskLock>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
