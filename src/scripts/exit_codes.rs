// src/scripts/exit_codes.rs

//! Reserved exit codes reported instead of a genuine child-process exit code.

/// Initial value before the script produced any result.
pub const NOT_SET: i32 = -1;

/// Something outside the script itself failed, typically writing the log.
pub const FATAL: i32 = -41;

/// The shell or job runtime could not be invoked.
pub const INVOCATION_ERROR: i32 = -42;

/// The isolation wait or the script execution was canceled.
pub const CANCELED: i32 = -43;

/// The isolation lock could not be acquired before its deadline.
pub const TIMED_OUT: i32 = -44;

/// Status was requested for a ticket this agent knows nothing about.
pub const UNKNOWN_SCRIPT: i32 = -45;

/// A state file exists but the run never recorded a result, e.g. the agent
/// restarted mid-run.
pub const UNKNOWN_RESULT: i32 = -46;

/// True for any of the reserved codes above.
pub fn is_sentinel(code: i32) -> bool {
    matches!(
        code,
        NOT_SET | FATAL | INVOCATION_ERROR | CANCELED | TIMED_OUT | UNKNOWN_SCRIPT | UNKNOWN_RESULT
    )
}
