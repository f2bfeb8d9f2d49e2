// src/exec/process.rs

//! Child process runner that streams output into a script log.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scripts::ScriptLogWriter;
use crate::types::ProcessOutputSource;

use super::ScriptExit;

const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const SIGNAL_EXIT_BASE: i32 = 128;

/// Run `program` with `args` in `working_dir`, copying stdout/stderr lines
/// into `writer` until the process exits.
///
/// If `cancel` fires first the child is killed and
/// [`ScriptExit::Canceled`] is returned.
pub async fn run_process(
    program: &Path,
    args: &[String],
    working_dir: &Path,
    writer: &ScriptLogWriter,
    cancel: &CancellationToken,
) -> Result<ScriptExit> {
    info!(program = ?program, ?args, dir = ?working_dir, "starting script process");
    writer.write_output_lossy(
        ProcessOutputSource::Debug,
        &format!("Starting {} in working directory '{}'", program.display(), working_dir.display()),
    );

    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {:?}", program))?;

    let stdout = child
        .stdout
        .take()
        .map(|out| pump_lines(out, writer.clone(), ProcessOutputSource::StdOut));
    let stderr = child
        .stderr
        .take()
        .map(|err| pump_lines(err, writer.clone(), ProcessOutputSource::StdErr));

    let exit = tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for {:?}", program))?;
            let code = exit_code(status);
            info!(program = ?program, exit_code = code, "script process exited");
            ScriptExit::Exited(code)
        }
        _ = cancel.cancelled() => {
            info!(program = ?program, "cancellation requested; killing script process");
            if let Err(e) = child.kill().await {
                warn!(program = ?program, error = %e, "failed to kill script process");
            }
            ScriptExit::Canceled
        }
    };

    // Drain whatever the pipes still hold so trailing output is not lost. A
    // background grandchild may keep them open, so the drain is bounded.
    for pump in [stdout, stderr].into_iter().flatten() {
        let abort = pump.abort_handle();
        match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "output pump task ended abnormally"),
            Err(_) => {
                abort.abort();
                debug!(program = ?program, "output pipe still open after exit; stopped reading");
            }
        }
    }

    Ok(exit)
}

fn pump_lines<R>(
    reader: R,
    writer: ScriptLogWriter,
    source: ProcessOutputSource,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    writer.write_output_lossy(source, &String::from_utf8_lossy(&buf));
                }
                Err(e) => {
                    debug!(source = source.as_str(), error = %e, "stopped reading script output");
                    break;
                }
            }
        }
    })
}

/// Exit code of a finished child. A process killed by a signal reports
/// `128 + signo`, the shell convention.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_BASE + signal;
        }
    }
    SIGNAL_EXIT_BASE
}
