// src/exec/job/mod.rs

//! Containerized job backend.
//!
//! A run renders a job manifest, submits it, then runs two activities side
//! by side until both have finished:
//! - a status poller that waits for the job to report Complete or Failed and
//!   then fires the shared completion signal;
//! - an [`OutputTailer`](tailer::OutputTailer) that follows the two output
//!   files until that signal, then drains them once more.

pub mod client;
pub mod manifest;
pub mod tailer;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::backoff::ExponentialBackoff;
use crate::types::ProcessOutputSource;
use crate::wait::{self, Interrupted};

use super::backend::{ScriptBackend, ScriptExit, ScriptRun};
use client::{JobClient, JobStatus};
use manifest::{JobManifest, MANIFEST_FILE_NAME, job_name};
use tailer::OutputTailer;

/// Settings for running scripts as Kubernetes jobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub image: String,
    pub namespace: Option<String>,
    pub kubectl: PathBuf,
    /// Where the workspace is mounted inside the container.
    pub work_mount_root: String,
    /// Upper bound for a single status query.
    #[serde(
        rename = "status_poll_timeout_secs",
        with = "crate::config::model::duration_secs"
    )]
    pub status_poll_timeout: Duration,
    pub ttl_seconds_after_finished: Option<u32>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            image: "octopusdeploy/worker-tools:ubuntu.22.04".to_string(),
            namespace: None,
            kubectl: PathBuf::from("kubectl"),
            work_mount_root: "/data/work".to_string(),
            status_poll_timeout: Duration::from_secs(30),
            ttl_seconds_after_finished: Some(600),
        }
    }
}

/// Backend running each script as a run-to-completion job.
#[derive(Debug, Clone)]
pub struct JobBackend {
    client: Arc<dyn JobClient>,
    settings: JobSettings,
    backoff: ExponentialBackoff,
}

enum JobOutcome {
    Finished(JobStatus),
    Canceled,
}

impl JobBackend {
    pub fn new(client: Arc<dyn JobClient>, settings: JobSettings) -> Self {
        Self {
            client,
            settings,
            backoff: ExponentialBackoff::POLLING,
        }
    }

    /// Override the delay curve between status polls.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn monitor_status(
        &self,
        job_name: &str,
        cancel: &CancellationToken,
        completed: &CancellationToken,
    ) -> JobOutcome {
        // Whatever happens here, the tailer must be told to stop.
        let _signal = completed.clone().drop_guard();

        let mut attempt = 0u32;
        loop {
            let deadline = wait::deadline_after(self.settings.status_poll_timeout);
            match wait::bounded(self.client.status(job_name), deadline, cancel).await {
                Err(Interrupted::Canceled) => return JobOutcome::Canceled,
                Err(Interrupted::TimedOut) => {
                    warn!(job = %job_name, "job status query timed out");
                }
                Ok(Err(err)) => {
                    warn!(job = %job_name, error = %err, "job status query failed");
                }
                Ok(Ok(JobStatus::Running)) => {}
                Ok(Ok(status)) => {
                    info!(job = %job_name, ?status, "job finished");
                    return JobOutcome::Finished(status);
                }
            }

            if wait::sleep(self.backoff.delay(attempt), cancel).await.is_err() {
                return JobOutcome::Canceled;
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

impl ScriptBackend for JobBackend {
    fn name(&self) -> String {
        "kubernetes job".to_string()
    }

    fn bootstrap_file_name(&self) -> &'static str {
        "Bootstrap.sh"
    }

    fn run<'a>(
        &'a self,
        run: ScriptRun<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptExit>> + Send + 'a>> {
        Box::pin(async move {
            let workspace = run.workspace;
            let name = job_name(workspace.ticket());

            let manifest = JobManifest::for_script(
                workspace.ticket(),
                run.task_id,
                &self.settings,
                workspace.working_directory(),
                self.bootstrap_file_name(),
                &workspace.script_arguments,
            );
            workspace.write_file(MANIFEST_FILE_NAME, manifest.to_yaml()?.as_bytes())?;

            run.writer.write_output(
                ProcessOutputSource::Debug,
                &format!("Submitting job {name}"),
            )?;
            self.client
                .submit(&workspace.resolve_path(MANIFEST_FILE_NAME))
                .await?;

            let completed = CancellationToken::new();
            let tailer = OutputTailer::new(workspace.working_directory());
            let (outcome, tailed) = tokio::join!(
                self.monitor_status(&name, run.cancel, &completed),
                tailer.run(run.writer, &completed),
            );
            if let Err(err) = tailed {
                warn!(job = %name, error = %err, "job output tailing failed");
                run.writer.write_output(
                    ProcessOutputSource::StdErr,
                    &format!("Failed to read job output: {err}"),
                )?;
            }

            match outcome {
                JobOutcome::Finished(JobStatus::Complete) => Ok(ScriptExit::Exited(0)),
                JobOutcome::Finished(_) => Ok(ScriptExit::Exited(1)),
                JobOutcome::Canceled => {
                    if let Err(err) = self.client.delete(&name).await {
                        debug!(job = %name, error = %err, "could not delete canceled job");
                    }
                    Ok(ScriptExit::Canceled)
                }
            }
        })
    }
}
