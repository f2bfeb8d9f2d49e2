// src/exec/job/client.rs

//! Access to the cluster that runs script jobs.

use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::debug;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Coarse job state as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    /// Parse the condition types printed by
    /// `kubectl get job -o jsonpath={.status.conditions[*].type}`.
    pub fn from_conditions(output: &str) -> Self {
        let mut status = JobStatus::Running;
        for condition in output.split_whitespace() {
            match condition.trim_matches('"') {
                "Failed" => return JobStatus::Failed,
                "Complete" => status = JobStatus::Complete,
                _ => {}
            }
        }
        status
    }
}

/// Trait abstracting the job runtime so tests can run without a cluster.
pub trait JobClient: Send + Sync + Debug {
    /// Submit the manifest at `manifest_path`.
    fn submit<'a>(&'a self, manifest_path: &'a Path) -> BoxFuture<'a, Result<()>>;

    fn status<'a>(&'a self, job_name: &'a str) -> BoxFuture<'a, Result<JobStatus>>;

    fn delete<'a>(&'a self, job_name: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// [`JobClient`] that shells out to `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlJobClient {
    kubectl: PathBuf,
    namespace: Option<String>,
}

impl KubectlJobClient {
    pub fn new(kubectl: impl Into<PathBuf>, namespace: Option<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            namespace,
        }
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(ns) = &self.namespace {
            cmd.arg("--namespace").arg(ns);
        }
        cmd.args(args).kill_on_drop(true);

        debug!(kubectl = ?self.kubectl, ?args, "running kubectl");
        let output = cmd
            .output()
            .await
            .with_context(|| format!("running {:?} {}", self.kubectl, args.join(" ")))?;

        if !output.status.success() {
            bail!(
                "kubectl {} failed with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl JobClient for KubectlJobClient {
    fn submit<'a>(&'a self, manifest_path: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = manifest_path.display().to_string();
            self.kubectl(&["apply", "-f", &path]).await?;
            Ok(())
        })
    }

    fn status<'a>(&'a self, job_name: &'a str) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async move {
            let out = self
                .kubectl(&[
                    "get",
                    "job",
                    job_name,
                    "-o",
                    "jsonpath={.status.conditions[*].type}",
                ])
                .await?;
            Ok(JobStatus::from_conditions(&out))
        })
    }

    fn delete<'a>(&'a self, job_name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.kubectl(&["delete", "job", job_name, "--ignore-not-found"])
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_map_to_status() {
        assert_eq!(JobStatus::from_conditions(""), JobStatus::Running);
        assert_eq!(JobStatus::from_conditions("Complete"), JobStatus::Complete);
        assert_eq!(JobStatus::from_conditions("\"Failed\""), JobStatus::Failed);
        assert_eq!(
            JobStatus::from_conditions("SuccessCriteriaMet Complete"),
            JobStatus::Complete
        );
    }
}
