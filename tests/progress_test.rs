//! Progress store: load, atomic record, quarantine, concurrent writers.

use statement_ingest::error::Error;
use statement_ingest::model::{OutcomeStatus, ProgressState, TaskOutcome};
use statement_ingest::progress::{ProgressStore, temp_path};
use std::sync::Arc;

#[tokio::test]
async fn missing_file_loads_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let state = ProgressStore::load(&dir.path().join("progress.json"))
        .await
        .unwrap();
    assert!(state.completed.is_empty());
    assert!(state.failed.is_empty());
    assert_eq!(state.total_planned, 0);
}

#[tokio::test]
async fn open_writes_the_file_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let _store = ProgressStore::open(&path).await.unwrap();
    assert!(path.exists());
    assert!(!temp_path(&path).exists());
}

#[tokio::test]
async fn record_persists_each_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let store = ProgressStore::open(&path).await.unwrap();

    store.record(&TaskOutcome::success("SH600001", 3)).await.unwrap();
    store
        .record(&TaskOutcome::failed("SZ000002", "timeout"))
        .await
        .unwrap();
    store.record(&TaskOutcome::skipped("SZ000003")).await.unwrap();
    store.set_total_planned(3).await.unwrap();

    let on_disk = ProgressStore::load(&path).await.unwrap();
    assert_eq!(on_disk, store.snapshot().await);
    assert!(on_disk.is_completed("SH600001"));
    assert_eq!(on_disk.failed.get("SZ000002").map(String::as_str), Some("timeout"));
    assert!(!on_disk.is_completed("SZ000003"));
    assert!(!on_disk.failed.contains_key("SZ000003"));
    assert_eq!(on_disk.total_planned, 3);
}

#[tokio::test]
async fn file_is_human_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let store = ProgressStore::open(&path).await.unwrap();
    store.record(&TaskOutcome::success("SH600001", 1)).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["completed"], serde_json::json!(["SH600001"]));
    assert!(raw["failed"].is_object());
    assert!(raw["last_updated"].is_string());
}

#[tokio::test]
async fn corrupt_file_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, "{ \"completed\": [\"SH6").unwrap();

    let store = ProgressStore::open(&path).await.unwrap();

    assert!(store.snapshot().await.completed.is_empty());
    let quarantined = dir.path().join("progress.json.corrupt");
    assert_eq!(
        std::fs::read_to_string(quarantined).unwrap(),
        "{ \"completed\": [\"SH6"
    );
}

#[tokio::test]
async fn load_leaves_a_corrupt_file_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, "not json").unwrap();

    let state = ProgressStore::load(&path).await.unwrap();

    assert!(state.completed.is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    assert!(!dir.path().join("progress.json.corrupt").exists());
}

#[tokio::test]
async fn earlier_quarantine_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let first = dir.path().join("progress.json.corrupt");
    std::fs::write(&first, "first").unwrap();
    std::fs::write(&path, "second").unwrap();

    let _store = ProgressStore::open(&path).await.unwrap();

    assert_eq!(std::fs::read_to_string(&first).unwrap(), "first");
    let quarantined: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("progress.json.corrupt."))
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join(&quarantined[0])).unwrap(),
        "second"
    );
}

#[tokio::test]
async fn hand_edited_file_without_timestamp_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, r#"{ "completed": ["SH600001"] }"#).unwrap();

    let store = ProgressStore::open(&path).await.unwrap();

    assert!(store.snapshot().await.is_completed("SH600001"));
    assert!(!dir.path().join("progress.json.corrupt").exists());
}

#[tokio::test]
async fn stale_temp_file_does_not_affect_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    {
        let store = ProgressStore::open(&path).await.unwrap();
        store.record(&TaskOutcome::success("SH600001", 1)).await.unwrap();
    }
    // A crash between writing the temp file and renaming it.
    std::fs::write(temp_path(&path), "garbage").unwrap();

    let store = ProgressStore::open(&path).await.unwrap();
    assert!(store.snapshot().await.is_completed("SH600001"));

    store.record(&TaskOutcome::success("SH600002", 1)).await.unwrap();
    let state = ProgressStore::load(&path).await.unwrap();
    assert_eq!(state.completed.len(), 2);
}

#[tokio::test]
async fn unwritable_location_is_a_checkpoint_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("progress.json");

    let err = ProgressStore::open(&path).await.err().unwrap();
    assert!(matches!(err, Error::Checkpoint { .. }));
}

#[tokio::test]
async fn unreadable_path_is_a_checkpoint_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be.
    let err = ProgressStore::load(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Checkpoint { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let store = Arc::new(ProgressStore::open(&path).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let code = format!("SH6{i:05}");
            let outcome = if i % 4 == 0 {
                TaskOutcome::failed(code, "transient: reset")
            } else {
                TaskOutcome::success(code, 1)
            };
            store.record(&outcome).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let state = ProgressStore::load(&path).await.unwrap();
    assert_eq!(state.completed.len(), 24);
    assert_eq!(state.failed.len(), 8);
    assert!(state.completed.iter().all(|c| !state.failed.contains_key(c)));
}

// ---------------------------------------------------------------------------
// State folding
// ---------------------------------------------------------------------------

#[test]
fn success_clears_an_earlier_failure() {
    let mut state = ProgressState::default();
    state.apply(&TaskOutcome::failed("A", "timeout"));
    state.apply(&TaskOutcome::success("A", 1));
    assert!(state.is_completed("A"));
    assert!(state.failed.is_empty());
}

#[test]
fn failure_never_downgrades_a_success() {
    let mut state = ProgressState::default();
    state.apply(&TaskOutcome::success("A", 1));
    state.apply(&TaskOutcome::failed("A", "timeout"));
    assert!(state.is_completed("A"));
    assert!(state.failed.is_empty());
}

#[test]
fn skipped_only_stamps_the_update_time() {
    let mut state = ProgressState::default();
    let before = state.last_updated;
    let outcome = TaskOutcome::skipped("A");
    assert_eq!(outcome.status, OutcomeStatus::Skipped);
    state.apply(&outcome);
    assert!(state.completed.is_empty());
    assert!(state.failed.is_empty());
    assert!(state.last_updated >= before);
}
