use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use scriptagent::exec::{ScriptBackend, ScriptExit, ScriptRun};
use scriptagent::types::ProcessOutputSource;

/// What a [`FakeBackend`] run does once it has started.
#[derive(Debug, Clone)]
pub enum FakeBehaviour {
    /// Write the configured output and exit with this code.
    Exit(i32),
    /// Wait until [`FakeBackend::release`] is called (or cancellation), then
    /// exit with this code.
    HoldUntilReleased(i32),
    /// Fail to invoke with this message.
    Fail(String),
}

/// A backend that never touches the OS.
///
/// - records the ticket of every run it was asked to perform
/// - tracks how many runs are active at once
/// - honours cancellation while held
#[derive(Debug, Clone)]
pub struct FakeBackend {
    behaviour: FakeBehaviour,
    output: Vec<String>,
    runs: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

impl FakeBackend {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            output: Vec::new(),
            runs: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn exiting(code: i32) -> Self {
        Self::new(FakeBehaviour::Exit(code))
    }

    pub fn held(code: i32) -> Self {
        Self::new(FakeBehaviour::HoldUntilReleased(code))
    }

    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Let `n` held runs finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptBackend for FakeBackend {
    fn name(&self) -> String {
        "fake".to_string()
    }

    fn bootstrap_file_name(&self) -> &'static str {
        "Bootstrap.sh"
    }

    fn run<'a>(
        &'a self,
        run: ScriptRun<'a>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ScriptExit>> + Send + 'a>> {
        Box::pin(async move {
            self.runs
                .lock()
                .unwrap()
                .push(run.workspace.ticket().to_string());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _active = ActiveGuard(Arc::clone(&self.active));

            for line in &self.output {
                run.writer.write_output(ProcessOutputSource::StdOut, line)?;
            }

            match &self.behaviour {
                FakeBehaviour::Exit(code) => Ok(ScriptExit::Exited(*code)),
                FakeBehaviour::Fail(message) => Err(anyhow::anyhow!("{message}")),
                FakeBehaviour::HoldUntilReleased(code) => {
                    tokio::select! {
                        _ = run.cancel.cancelled() => Ok(ScriptExit::Canceled),
                        permit = self.gate.acquire() => {
                            permit?.forget();
                            Ok(ScriptExit::Exited(*code))
                        }
                    }
                }
            }
        })
    }
}
