// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod isolation;
pub mod logging;
pub mod rpc;
pub mod scripts;
pub mod types;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::client::{InProcessTransport, ScriptExecutionOrchestrator};
use crate::config::{AgentConfig, load_or_default};
use crate::exec::ExecutionStrategy;
use crate::fs::{FileSystem, RealFileSystem};
use crate::isolation::{IsolationMutex, LockRegistry};
use crate::rpc::{
    RpcCallExecutor, RpcCallNoRetriesHandler, RpcCallRetryHandler, TracingRpcCallObserver,
};
use crate::scripts::{ProcessOutput, ScriptService, SensitiveValueMasker, StartScriptCommand};
use crate::types::{ProcessOutputSource, ScriptTicket};

/// High-level entry point used by `main.rs`. Returns the script's exit code.
///
/// This wires together:
/// - config loading
/// - one lock registry and one execution backend for the process
/// - the script service, driven through the in-process transport
/// - streaming of the script log to STDOUT/STDERR
/// - Ctrl-C handling (cancels the script and waits for it to stop)
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(args.config.as_deref())?;

    if args.dry_run {
        print_dry_run(&cfg, &args);
        return Ok(0);
    }

    let script_path = args
        .script
        .as_ref()
        .context("--script is required unless --dry-run is given")?;
    let script_body = std::fs::read_to_string(script_path)
        .with_context(|| format!("reading script {script_path:?}"))?;

    let registry = Arc::new(LockRegistry::new());
    let backend = cfg.strategy.clone().into_backend();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let service = Arc::new(
        ScriptService::new(
            &cfg.workspace_root,
            fs,
            backend,
            IsolationMutex::new(Arc::clone(&registry)),
        )
        .with_masker(SensitiveValueMasker::new(cfg.sensitive_values.iter().cloned())),
    );

    let executor = RpcCallExecutor::new(
        RpcCallRetryHandler::new(cfg.rpc.retry_timeout)
            .with_timeout_strategy(cfg.rpc.timeout_strategy),
        RpcCallNoRetriesHandler::new(cfg.rpc.abandon_after),
        Arc::new(TracingRpcCallObserver),
    );
    let orchestrator = ScriptExecutionOrchestrator::new(
        Arc::new(InProcessTransport::new(Arc::clone(&service))),
        executor,
        cfg.rpc.retries_enabled,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received, cancelling script");
            cancel.cancel();
        });
    }

    let command = build_command(&cfg, &args, script_body);
    info!(
        ticket = %command.ticket,
        task_id = %command.task_id,
        script = ?script_path,
        "running script"
    );

    let result = orchestrator.execute(command, print_logs, &cancel).await;

    service.shutdown();
    registry.shutdown();

    let result = result?;
    debug!(ticket = %result.ticket, exit_code = result.exit_code, "script finished");
    Ok(result.exit_code)
}

/// Merge command-line overrides over the configured defaults.
pub fn build_command(cfg: &AgentConfig, args: &CliArgs, script_body: String) -> StartScriptCommand {
    let ticket = args
        .ticket
        .clone()
        .map(ScriptTicket::new)
        .unwrap_or_else(ScriptTicket::generate);
    let task_id = args
        .task_id
        .clone()
        .or_else(|| cfg.task_id.clone())
        .unwrap_or_else(|| format!("Local-{ticket}"));
    let mutex_timeout = args
        .mutex_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(cfg.isolation.mutex_acquire_timeout);
    let mutex_name = args
        .mutex_name
        .clone()
        .unwrap_or_else(|| cfg.isolation.mutex_name.clone());

    StartScriptCommand::new(ticket, task_id, script_body)
        .with_isolation(args.isolation.into())
        .with_mutex_timeout(mutex_timeout)
        .with_mutex_name(mutex_name)
        .with_arguments(args.script_args.clone())
}

fn print_logs(logs: &[ProcessOutput]) {
    for line in logs {
        match line.source {
            ProcessOutputSource::StdOut => println!("{}", line.message),
            ProcessOutputSource::StdErr => eprintln!("{}", line.message),
            ProcessOutputSource::Debug => debug!(target: "script", "{}", line.message),
        }
    }
}

/// Simple dry-run output: print the resolved configuration.
fn print_dry_run(cfg: &AgentConfig, args: &CliArgs) {
    println!("scriptagent dry-run");
    println!("  agent.workspace_root = {}", cfg.workspace_root.display());
    if let Some(task_id) = &cfg.task_id {
        println!("  agent.task_id = {task_id}");
    }
    println!("  agent.sensitive_values = {}", cfg.sensitive_values.len());
    println!("  isolation.mutex_name = {}", cfg.isolation.mutex_name);
    println!(
        "  isolation.mutex_acquire_timeout = {:?}",
        cfg.isolation.mutex_acquire_timeout
    );
    match &cfg.strategy {
        ExecutionStrategy::LocalShell { shell, executable } => {
            let executable = executable
                .clone()
                .unwrap_or_else(|| shell.default_executable());
            println!("  strategy = local shell {shell} ({})", executable.display());
        }
        ExecutionStrategy::ContainerJob(job) => {
            println!("  strategy = kubernetes job");
            println!("      image: {}", job.image);
            if let Some(ns) = &job.namespace {
                println!("      namespace: {ns}");
            }
            println!("      kubectl: {}", job.kubectl.display());
        }
    }
    println!(
        "  rpc: retries_enabled={} retry_timeout={:?} timeout_strategy={:?}",
        cfg.rpc.retries_enabled, cfg.rpc.retry_timeout, cfg.rpc.timeout_strategy
    );
    println!();
    println!("script: {:?}", args.script);
    println!("  isolation = {:?}", args.isolation);
    if !args.script_args.is_empty() {
        println!("  arguments = {:?}", args.script_args);
    }
}
