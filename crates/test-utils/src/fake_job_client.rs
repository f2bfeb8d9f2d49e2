use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use scriptagent::exec::job::client::{BoxFuture, JobClient, JobStatus};

type SubmitHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Scripted stand-in for a cluster.
///
/// `status` pops the next scripted answer and keeps repeating the last one
/// once the script runs out. `on_submit` can play the container's part,
/// e.g. by writing output files next to the manifest.
#[derive(Clone, Default)]
pub struct FakeJobClient {
    statuses: Arc<Mutex<VecDeque<JobStatus>>>,
    last: Arc<Mutex<Option<JobStatus>>>,
    submitted: Arc<Mutex<Vec<PathBuf>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    status_calls: Arc<AtomicUsize>,
    fail_submit: Option<String>,
    on_submit: Option<SubmitHook>,
}

impl std::fmt::Debug for FakeJobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeJobClient")
            .field("statuses", &self.statuses)
            .field("submitted", &self.submitted)
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl FakeJobClient {
    pub fn new(statuses: &[JobStatus]) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
            ..Self::default()
        }
    }

    pub fn failing_submit(mut self, message: &str) -> Self {
        self.fail_submit = Some(message.to_string());
        self
    }

    pub fn on_submit(mut self, hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_submit = Some(Arc::new(hook));
        self
    }

    pub fn submitted(&self) -> Vec<PathBuf> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl JobClient for FakeJobClient {
    fn submit<'a>(&'a self, manifest_path: &'a Path) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if let Some(message) = &self.fail_submit {
                anyhow::bail!("{message}");
            }
            self.submitted
                .lock()
                .unwrap()
                .push(manifest_path.to_path_buf());
            if let Some(hook) = &self.on_submit {
                hook(manifest_path);
            }
            Ok(())
        })
    }

    fn status<'a>(&'a self, _job_name: &'a str) -> BoxFuture<'a, anyhow::Result<JobStatus>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.statuses.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(status) = next {
                *last = Some(status);
            }
            Ok(last.unwrap_or(JobStatus::Running))
        })
    }

    fn delete<'a>(&'a self, job_name: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.deleted.lock().unwrap().push(job_name.to_string());
            Ok(())
        })
    }
}
