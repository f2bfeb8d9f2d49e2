// src/isolation/messages.rs

//! Operator-facing explanations of why a script is waiting on the isolation
//! lock. These end up in the script log, so they name the tasks involved
//! instead of reporting opaque codes.

use std::time::Duration;

use super::registry::LockHolders;

struct HolderSummary {
    names: String,
    multiple: bool,
    includes_this_task: bool,
}

fn summarize(holders: &LockHolders, task_id: &str) -> HolderSummary {
    if let Some(writer) = holders.writer() {
        return HolderSummary {
            names: writer.to_string(),
            multiple: false,
            includes_this_task: writer == task_id,
        };
    }

    let ids: Vec<&str> = holders.reader_ids().collect();
    let names = if ids.is_empty() {
        "(error - task not found)".to_string()
    } else {
        readable_join(
            &ids.iter()
                .map(|id| if *id == task_id { "This Task" } else { *id })
                .collect::<Vec<_>>(),
        )
    };

    HolderSummary {
        names,
        multiple: ids.len() > 1,
        includes_this_task: ids.contains(&task_id),
    }
}

/// Message written while a task waits for the lock.
pub fn busy_message(holders: &LockHolders, task_id: &str, waiting_on_write: bool) -> String {
    let summary = summarize(holders, task_id);

    // Several holders means they are all readers and this task wants to write.
    if summary.multiple {
        return format!(
            "Waiting on scripts in tasks {} to finish. This script requires that no other scripts are executing on this target at the same time.",
            summary.names
        );
    }

    if summary.includes_this_task {
        return format!(
            "Waiting on another script in this task to finish as {} task requires that no other scripts are executing on this target at the same time.",
            if waiting_on_write { "this" } else { "another" }
        );
    }

    format!(
        "Waiting for the script in task {} to finish as {} script requires that no other scripts are executing on this target at the same time.",
        summary.names,
        if waiting_on_write { "this" } else { "that" }
    )
}

pub fn canceled_message(holders: &LockHolders, task_id: &str) -> String {
    let summary = summarize(holders, task_id);
    if summary.multiple {
        format!(
            "This task was canceled before it could start. Tasks {} are still running.",
            summary.names
        )
    } else {
        format!(
            "This task was canceled before it could start. Task {} is still running.",
            summary.names
        )
    }
}

pub fn timed_out_message(holders: &LockHolders, timeout: Duration, task_id: &str) -> String {
    let summary = summarize(holders, task_id);
    let waited = describe_timeout(timeout);
    if summary.multiple {
        format!(
            "This task waited more than {waited} and timed out. Tasks {} are still running.",
            summary.names
        )
    } else {
        format!(
            "This task waited more than {waited} and timed out. Task {} is still running.",
            summary.names
        )
    }
}

fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs >= 60 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{secs} seconds")
    }
}

/// "a", "a and b", "a, b and c".
pub fn readable_join(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
