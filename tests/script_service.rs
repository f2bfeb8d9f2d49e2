mod common;
use crate::common::builders::{StartScriptCommandBuilder, script_service};
use crate::common::{TestResult, init_tracing, wait_until_complete, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use scriptagent::fs::{FileSystem, RealFileSystem};
use scriptagent::scripts::exit_codes;
use scriptagent::scripts::ScriptStateStore;
use scriptagent::types::{ProcessState, ScriptTicket};
use scriptagent_test_utils::fake_backend::{FakeBackend, FakeBehaviour};

fn real_fs() -> Arc<dyn FileSystem> {
    Arc::new(RealFileSystem)
}

#[tokio::test]
async fn short_script_reports_its_final_status_from_start() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::exiting(0).with_output(&["hello", "world"]);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    let command = StartScriptCommandBuilder::new("t1")
        .wait_for_finish(Duration::from_secs(5))
        .build();
    let status = with_timeout(service.start_script(command)).await?;

    assert_eq!(status.state, ProcessState::Complete);
    assert_eq!(status.exit_code, 0);
    let messages: Vec<_> = status.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["hello", "world"]);
    assert_eq!(status.next_log_sequence, 2);
    assert_eq!(backend.runs(), vec!["t1".to_string()]);

    // The persisted record agrees.
    let store = ScriptStateStore::new(ScriptTicket::new("t1"), &dir.path().join("t1"), real_fs());
    let state = store.load()?;
    assert_eq!(state.state, ProcessState::Complete);
    assert_eq!(state.exit_code, Some(0));
    assert!(state.has_started());
    Ok(())
}

#[tokio::test]
async fn workspace_contains_bootstrap_and_extra_files() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    let command = StartScriptCommandBuilder::new("t1")
        .body("echo from bootstrap")
        .file("data.txt", "payload")
        .build();
    service.start_script(command).await?;

    let workspace = dir.path().join("t1");
    assert_eq!(std::fs::read_to_string(workspace.join("Bootstrap.sh"))?, "echo from bootstrap");
    assert_eq!(std::fs::read_to_string(workspace.join("data.txt"))?, "payload");
    assert!(workspace.join("scriptstate.json").exists());

    backend.release(1);
    let (status, _) = wait_until_complete(&service, &ScriptTicket::new("t1")).await?;
    assert_eq!(status.exit_code, 0);
    Ok(())
}

#[tokio::test]
async fn starting_a_known_ticket_does_not_run_it_twice() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    let again = service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    assert_ne!(again.state, ProcessState::Complete);

    backend.release(1);
    wait_until_complete(&service, &ScriptTicket::new("t1")).await?;
    service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    assert_eq!(backend.runs().len(), 1);
    Ok(())
}

#[tokio::test]
async fn no_isolation_scripts_run_side_by_side() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    service.start_script(StartScriptCommandBuilder::new("a").build()).await?;
    service.start_script(StartScriptCommandBuilder::new("b").build()).await?;

    with_timeout(async {
        while backend.active() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    backend.release(2);
    wait_until_complete(&service, &ScriptTicket::new("a")).await?;
    wait_until_complete(&service, &ScriptTicket::new("b")).await?;
    assert_eq!(backend.max_active(), 2);
    Ok(())
}

#[tokio::test]
async fn full_isolation_script_times_out_behind_a_running_script() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    service
        .start_script(StartScriptCommandBuilder::new("first").task_id("ServerTasks-1").full_isolation().build())
        .await?;
    with_timeout(async {
        while backend.active() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    service
        .start_script(
            StartScriptCommandBuilder::new("second")
                .task_id("ServerTasks-2")
                .full_isolation()
                .mutex_timeout(Duration::from_secs(1))
                .build(),
        )
        .await?;

    let second = ScriptTicket::new("second");
    let (status, messages) = wait_until_complete(&service, &second).await?;
    assert_eq!(status.exit_code, exit_codes::TIMED_OUT);
    assert!(
        messages.iter().any(|m| m.starts_with(
            "Waiting for the script in task ServerTasks-1 to finish as this script requires"
        )),
        "{messages:?}"
    );
    assert!(messages.iter().any(|m| m.contains("waited more than 1 seconds and timed out")));
    assert_eq!(messages.last().map(String::as_str), Some("Script execution timed out."));
    assert_eq!(backend.runs(), vec!["first".to_string()]);

    // It never started.
    let state = ScriptStateStore::new(second.clone(), &dir.path().join("second"), real_fs()).load()?;
    assert!(!state.has_started());
    assert_eq!(state.exit_code, Some(exit_codes::TIMED_OUT));

    backend.release(1);
    let (first, _) = wait_until_complete(&service, &ScriptTicket::new("first")).await?;
    assert_eq!(first.exit_code, 0);
    Ok(())
}

#[tokio::test]
async fn scripts_with_different_mutex_names_do_not_wait() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    for (ticket, name) in [("a", "machine-a"), ("b", "machine-b")] {
        service
            .start_script(StartScriptCommandBuilder::new(ticket).full_isolation().mutex_name(name).build())
            .await?;
    }
    with_timeout(async {
        while backend.active() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    backend.release(2);
    Ok(())
}

#[tokio::test]
async fn cancelling_while_waiting_for_the_lock() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));

    service
        .start_script(StartScriptCommandBuilder::new("first").full_isolation().build())
        .await?;
    service
        .start_script(StartScriptCommandBuilder::new("second").full_isolation().build())
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = ScriptTicket::new("second");
    assert_eq!(service.get_status(&second, 0)?.state, ProcessState::Pending);
    service.cancel_script(&second, 0)?;

    let (status, messages) = wait_until_complete(&service, &second).await?;
    assert_eq!(status.exit_code, exit_codes::CANCELED);
    assert!(messages.iter().any(|m| m.starts_with("This task was canceled before it could start.")));
    assert_eq!(messages.last().map(String::as_str), Some("Script execution canceled."));

    backend.release(1);
    wait_until_complete(&service, &ScriptTicket::new("first")).await?;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_script() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));
    let ticket = ScriptTicket::new("t1");

    service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    with_timeout(async {
        while backend.active() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(service.get_status(&ticket, 0)?.state, ProcessState::Running);

    service.cancel_script(&ticket, 0)?;
    let (status, _) = wait_until_complete(&service, &ticket).await?;
    assert_eq!(status.exit_code, exit_codes::CANCELED);
    Ok(())
}

#[tokio::test]
async fn backend_failure_is_reported_as_an_invocation_error() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::new(FakeBehaviour::Fail("shell not found".to_string()));
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend));

    let status = service
        .start_script(StartScriptCommandBuilder::new("t1").wait_for_finish(Duration::from_secs(5)).build())
        .await?;
    assert_eq!(status.state, ProcessState::Complete);
    assert_eq!(status.exit_code, exit_codes::INVOCATION_ERROR);
    assert_eq!(
        status.logs.last().map(|l| l.message.as_str()),
        Some("An exception was thrown when invoking fake: shell not found")
    );
    Ok(())
}

#[tokio::test]
async fn unknown_ticket_is_reported_as_unknown_script() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(FakeBackend::exiting(0)));

    let status = service.get_status(&ScriptTicket::new("nope"), 7)?;
    assert_eq!(status.state, ProcessState::Complete);
    assert_eq!(status.exit_code, exit_codes::UNKNOWN_SCRIPT);
    assert!(status.logs.is_empty());
    assert_eq!(status.next_log_sequence, 7);
    Ok(())
}

#[tokio::test]
async fn script_lost_by_a_previous_agent_is_completed_with_unknown_result() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ticket = ScriptTicket::new("orphan");

    // Leave behind a workspace whose script was running when the agent died.
    let store = ScriptStateStore::new(ticket.clone(), &dir.path().join("orphan"), real_fs());
    let mut state = store.create()?;
    state.start()?;
    store.save(&state)?;

    let backend = FakeBackend::exiting(0);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));
    let status = service.get_status(&ticket, 0)?;
    assert_eq!(status.state, ProcessState::Complete);
    assert_eq!(status.exit_code, exit_codes::UNKNOWN_RESULT);

    let saved = store.load()?;
    assert_eq!(saved.exit_code, Some(exit_codes::UNKNOWN_RESULT));
    assert_eq!(saved.ran_to_completion, Some(false));

    // Starting it again does not re-run it.
    service.start_script(StartScriptCommandBuilder::new("orphan").build()).await?;
    assert!(backend.runs().is_empty());
    Ok(())
}

#[tokio::test]
async fn complete_returns_final_status_and_removes_the_workspace() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::exiting(5).with_output(&["done"]);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend));
    let ticket = ScriptTicket::new("t1");

    service
        .start_script(StartScriptCommandBuilder::new("t1").wait_for_finish(Duration::from_secs(5)).build())
        .await?;
    let completed = service.complete_script(&ticket, 0)?;
    assert_eq!(completed.exit_code, 5);
    assert_eq!(completed.logs.len(), 1);
    assert!(!dir.path().join("t1").exists());

    // Once forgotten, the ticket is unknown.
    assert_eq!(service.get_status(&ticket, 0)?.exit_code, exit_codes::UNKNOWN_SCRIPT);
    Ok(())
}

#[tokio::test]
async fn state_save_failure_is_only_a_warning() -> TestResult {
    init_tracing();
    let fs = scriptagent::fs::mock::MockFileSystem::new();
    let backend = FakeBackend::held(0);
    let (service, _registry) = script_service(
        std::path::Path::new("/work"),
        Arc::new(fs.clone()),
        Arc::new(backend.clone()),
    );
    let ticket = ScriptTicket::new("t1");

    service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    with_timeout(async {
        while backend.active() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    fs.fail_next_replace();
    backend.release(1);

    let (status, messages) = wait_until_complete(&service, &ticket).await?;
    assert_eq!(status.exit_code, 0);
    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("Warning: An exception occurred saving the ScriptState:")),
        "{messages:?}"
    );
    Ok(())
}

#[tokio::test]
async fn running_script_handle_waits_for_completion() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::held(7);
    let (service, _registry) = script_service(dir.path(), real_fs(), Arc::new(backend.clone()));
    let ticket = ScriptTicket::new("t1");

    service.start_script(StartScriptCommandBuilder::new("t1").build()).await?;
    let script = service.running_script(&ticket).ok_or("script is not running")?;
    assert_ne!(script.state(), ProcessState::Complete);

    backend.release(1);
    let status = with_timeout(script.wait_for_completion()).await;
    assert_eq!(status.state, ProcessState::Complete);
    assert_eq!(status.exit_code, 7);

    // Already complete: returns the published status straight away.
    let again = with_timeout(script.wait_for_completion()).await;
    assert_eq!(again, status);
    Ok(())
}

#[tokio::test]
async fn tickets_that_escape_the_workspace_root_are_rejected() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("work");
    std::fs::create_dir_all(&root)?;
    let precious = dir.path().join("precious.txt");
    std::fs::write(&precious, "keep me")?;
    let backend = FakeBackend::exiting(0);
    let (service, _registry) = script_service(&root, real_fs(), Arc::new(backend.clone()));

    for bad in ["..", "", ".", "../escape", "a/b", "a/"] {
        let ticket = ScriptTicket::new(bad);
        assert!(!ticket.is_valid_directory_name(), "{bad:?}");
        assert!(
            service.start_script(StartScriptCommandBuilder::new(bad).build()).await.is_err(),
            "{bad:?} was started"
        );
        let completed = service.complete_script(&ticket, 0)?;
        assert_eq!(completed.exit_code, exit_codes::UNKNOWN_SCRIPT, "{bad:?}");
    }

    assert_eq!(std::fs::read_to_string(&precious)?, "keep me");
    assert!(root.is_dir());
    assert!(!dir.path().join("escape").exists());
    assert!(backend.runs().is_empty());
    assert!(ScriptTicket::generate().is_valid_directory_name());
    Ok(())
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "gave up waiting")]
async fn hung_wait_fails_the_test() {
    with_timeout(std::future::pending::<()>()).await;
}
