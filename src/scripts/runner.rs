// src/scripts/runner.rs

//! Runs one script under the isolation lock on a dedicated thread.
//!
//! The worker thread hosts its own single-threaded Tokio runtime so the
//! blocking parts of a run (lock polling, child process I/O, job polling)
//! never compete with other scripts or with the caller's runtime. The
//! caller gets a [`RunningScript`] handle back immediately.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::errors::Result;
use crate::exec::{ScriptBackend, ScriptExit, ScriptRun};
use crate::isolation::{IsolationError, IsolationMutex};
use crate::types::{ProcessOutputSource, ProcessState, ScriptTicket};

use super::exit_codes;
use super::log::{ScriptLog, ScriptLogWriter};
use super::state::ScriptStateStore;
use super::workspace::ScriptWorkspace;

/// Observable state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStatus {
    pub state: ProcessState,
    pub exit_code: i32,
}

/// Everything one run needs.
#[derive(Debug)]
pub struct ScriptContext {
    pub workspace: ScriptWorkspace,
    /// Persisted state; runs without one are not recorded on disk.
    pub state_store: Option<Arc<ScriptStateStore>>,
    pub log: ScriptLog,
    pub backend: Arc<dyn ScriptBackend>,
    pub mutex: IsolationMutex,
    pub task_id: String,
}

/// Handle to a script executing on its worker thread.
#[derive(Debug)]
pub struct RunningScript {
    ticket: ScriptTicket,
    log: ScriptLog,
    status: watch::Receiver<ScriptStatus>,
    cancel: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RunningScript {
    /// Spawn the worker thread and return immediately.
    pub fn start(ctx: ScriptContext) -> Result<Self> {
        let ticket = ctx.workspace.ticket().clone();
        let log = ctx.log.clone();
        let (status_tx, status_rx) = watch::channel(ScriptStatus {
            state: ProcessState::Pending,
            exit_code: exit_codes::NOT_SET,
        });
        let cancel = CancellationToken::new();

        let worker_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(format!("script-{ticket}"))
            .spawn(move || run_on_worker_thread(ctx, status_tx, worker_cancel))?;

        Ok(Self {
            ticket,
            log,
            status: status_rx,
            cancel,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn ticket(&self) -> &ScriptTicket {
        &self.ticket
    }

    pub fn log(&self) -> &ScriptLog {
        &self.log
    }

    pub fn status(&self) -> ScriptStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> ProcessState {
        self.status().state
    }

    pub fn exit_code(&self) -> i32 {
        self.status().exit_code
    }

    /// Request cooperative cancellation. An isolation wait stops right away;
    /// a running process is killed on a best-effort basis.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait_for_completion(&self) -> ScriptStatus {
        let mut rx = self.status.clone();
        let done = rx
            .wait_for(|s| s.state == ProcessState::Complete)
            .await
            .map(|status| *status);
        match done {
            Ok(status) => status,
            // The worker is gone; report whatever it published last.
            Err(_) => *rx.borrow(),
        }
    }

    /// Block until the worker thread has exited.
    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(ticket = %self.ticket, "script worker thread panicked");
            }
        }
    }
}

fn run_on_worker_thread(
    ctx: ScriptContext,
    status: watch::Sender<ScriptStatus>,
    cancel: CancellationToken,
) {
    let ticket = ctx.workspace.ticket().clone();
    let store = ctx.state_store.clone();
    let log = ctx.log.clone();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(execute(ctx, &status, cancel));
        Ok::<_, std::io::Error>(())
    }));

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => format!("could not start script runtime: {err}"),
        Err(_) => "script worker panicked".to_string(),
    };

    error!(ticket = %ticket, "{failure}");
    if status.borrow().state != ProcessState::Complete {
        record_completed(store.as_deref(), &log.writer(), exit_codes::FATAL);
        status.send_replace(ScriptStatus {
            state: ProcessState::Complete,
            exit_code: exit_codes::FATAL,
        });
    }
}

async fn execute(ctx: ScriptContext, status: &watch::Sender<ScriptStatus>, cancel: CancellationToken) {
    let span = info_span!(
        "script",
        ticket = %ctx.workspace.ticket(),
        task_id = %ctx.task_id
    );

    async move {
        let writer = ctx.log.writer();

        let exit_code = match run_under_lock(&ctx, &writer, status, &cancel).await {
            Ok(code) => code,
            Err(err) => {
                // Typically the log itself could not be written (disk full).
                error!(error = %err, "script execution failed");
                exit_codes::FATAL
            }
        };

        record_completed(ctx.state_store.as_deref(), &writer, exit_code);
        status.send_replace(ScriptStatus {
            state: ProcessState::Complete,
            exit_code,
        });
        info!(exit_code, "script complete");
    }
    .instrument(span)
    .await
}

async fn run_under_lock(
    ctx: &ScriptContext,
    writer: &ScriptLogWriter,
    status: &watch::Sender<ScriptStatus>,
    cancel: &CancellationToken,
) -> Result<i32> {
    let isolation = &ctx.workspace.isolation;
    let acquired = ctx
        .mutex
        .acquire(
            isolation.level,
            isolation.mutex_acquire_timeout,
            isolation.mutex_name(),
            &ctx.task_id,
            cancel,
            |message| writer.write_output_lossy(ProcessOutputSource::StdOut, message),
        )
        .await;

    let _guard = match acquired {
        Ok(guard) => guard,
        Err(IsolationError::Canceled { .. }) => {
            writer.write_output(ProcessOutputSource::StdOut, "Script execution canceled.")?;
            return Ok(exit_codes::CANCELED);
        }
        Err(IsolationError::TimedOut { .. }) => {
            writer.write_output(ProcessOutputSource::StdOut, "Script execution timed out.")?;
            return Ok(exit_codes::TIMED_OUT);
        }
    };

    status.send_modify(|s| s.state = ProcessState::Running);
    record_started(ctx.state_store.as_deref(), writer);

    let run = ScriptRun {
        workspace: &ctx.workspace,
        task_id: &ctx.task_id,
        writer,
        cancel,
    };
    match ctx.backend.run(run).await {
        Ok(ScriptExit::Exited(code)) => Ok(code),
        Ok(ScriptExit::Canceled) => {
            writer.write_output(ProcessOutputSource::StdOut, "Script execution canceled.")?;
            Ok(exit_codes::CANCELED)
        }
        Err(err) => {
            writer.write_output(
                ProcessOutputSource::StdErr,
                &format!(
                    "An exception was thrown when invoking {}: {err:#}",
                    ctx.backend.name()
                ),
            )?;
            Ok(exit_codes::INVOCATION_ERROR)
        }
    }
}

// State persistence is advisory: failures are reported in the log and never
// change the outcome of the run.

fn record_started(store: Option<&ScriptStateStore>, writer: &ScriptLogWriter) {
    let Some(store) = store else { return };
    let saved = store.load().and_then(|mut state| {
        state.start()?;
        store.save(&state)
    });
    if let Err(err) = saved {
        report_state_failure(writer, &err);
    }
}

fn record_completed(store: Option<&ScriptStateStore>, writer: &ScriptLogWriter, exit_code: i32) {
    let Some(store) = store else { return };
    let saved = store.load().and_then(|mut state| {
        state.complete(exit_code, true)?;
        store.save(&state)
    });
    if let Err(err) = saved {
        report_state_failure(writer, &err);
    }
}

fn report_state_failure(writer: &ScriptLogWriter, err: &crate::errors::AgentError) {
    warn!(error = %err, "failed to save script state");
    writer.write_output_lossy(
        ProcessOutputSource::StdOut,
        &format!("Warning: An exception occurred saving the ScriptState: {err}"),
    );
}
