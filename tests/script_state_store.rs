mod common;
use crate::common::{TestResult, init_tracing};

use std::path::Path;
use std::sync::Arc;

use scriptagent::errors::AgentError;
use scriptagent::fs::mock::MockFileSystem;
use scriptagent::fs::{FileSystem, RealFileSystem};
use scriptagent::scripts::state::{BACKUP_FILE_NAME, STATE_FILE_NAME};
use scriptagent::scripts::{ScriptState, ScriptStateStore};
use scriptagent::types::{ProcessState, ScriptTicket};

fn store_on(fs: &MockFileSystem) -> ScriptStateStore {
    ScriptStateStore::new(
        ScriptTicket::new("ticket-1"),
        Path::new("/work/ticket-1"),
        Arc::new(fs.clone()),
    )
}

#[test]
fn create_writes_a_pending_record_once() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = store_on(&fs);

    let created = store.create()?;
    assert_eq!(created.state, ProcessState::Pending);
    assert!(store.exists());
    assert_eq!(store.load()?, created);

    match store.create() {
        Err(AgentError::StateAlreadyExists(path)) => assert!(path.ends_with(STATE_FILE_NAME)),
        other => panic!("expected StateAlreadyExists, got {other:?}"),
    }
    Ok(())
}

#[test]
fn load_and_save_require_an_existing_record() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = store_on(&fs);

    assert!(matches!(store.load(), Err(AgentError::StateMissing(_))));
    let state = ScriptState::new(ScriptTicket::new("ticket-1"));
    assert!(matches!(store.save(&state), Err(AgentError::StateMissing(_))));
    assert!(fs.paths().is_empty());
    Ok(())
}

#[test]
fn failed_replace_keeps_the_previous_record() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = store_on(&fs);

    let mut state = store.create()?;
    state.start()?;
    store.save(&state)?;

    let mut completed = state.clone();
    completed.complete(0, true)?;
    fs.fail_next_replace();
    assert!(store.save(&completed).is_err());

    let loaded = store.load()?;
    assert_eq!(loaded.state, ProcessState::Running);
    assert_eq!(loaded, state);

    // No temp file is left behind.
    let leftovers: Vec<_> = fs
        .paths()
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");

    store.save(&completed)?;
    assert_eq!(store.load()?.exit_code, Some(0));
    Ok(())
}

#[test]
fn corrupt_record_falls_back_to_the_backup() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = store_on(&fs);

    let mut state = store.create()?;
    state.start()?;
    store.save(&state)?;
    assert!(fs.contents(Path::new("/work/ticket-1").join(BACKUP_FILE_NAME)).is_some());

    fs.add_file(Path::new("/work/ticket-1").join(STATE_FILE_NAME), "{ not json");

    // The backup holds the record from before the last save.
    let loaded = store.load()?;
    assert_eq!(loaded.state, ProcessState::Pending);
    assert_eq!(loaded.ticket, ScriptTicket::new("ticket-1"));
    Ok(())
}

#[test]
fn corrupt_record_without_backup_is_an_error() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = store_on(&fs);
    store.create()?;
    fs.add_file(Path::new("/work/ticket-1").join(STATE_FILE_NAME), "garbage");

    assert!(matches!(store.load(), Err(AgentError::Json(_))));
    Ok(())
}

#[test]
fn real_filesystem_round_trip_with_backup() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = ScriptStateStore::new(ScriptTicket::new("t"), dir.path(), fs);

    let mut state = store.create()?;
    state.start()?;
    store.save(&state)?;
    state.complete(3, true)?;
    store.save(&state)?;

    let loaded = store.load()?;
    assert_eq!(loaded.state, ProcessState::Complete);
    assert_eq!(loaded.exit_code, Some(3));
    assert_eq!(loaded.ran_to_completion, Some(true));
    assert!(dir.path().join(BACKUP_FILE_NAME).exists());

    let entries: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().all(|name| !name.ends_with(".tmp")), "{entries:?}");
    Ok(())
}
