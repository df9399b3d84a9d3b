//! Progress Store Integration Tests
//!
//! Durability, locking and corruption handling of the progress document.

use chrono::{Local, Utc};
use stealthdl::core::{CorruptionPolicy, ProgressStore, StoreError, PROGRESS_FILE};
use stealthdl::domain::{AttemptOutcome, DownloadStatus, MediaItem, ProgressState};
use tempfile::TempDir;

fn item(id: &str) -> MediaItem {
    MediaItem::new(id, format!("Title {}", id), format!("https://example.com/watch?v={}", id))
}

fn dir_entries(temp: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_save_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let mut store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();

    for i in 0..20 {
        let id = format!("item{:07}", i);
        store.begin_attempt(&item(&id), "s1", Utc::now()).unwrap();
        store
            .record_attempt(&item(&id), AttemptOutcome::Downloaded, None, "s1", Local::now())
            .unwrap();

        // The canonical file parses after every write
        let state = ProgressStore::load(&temp.path().join(PROGRESS_FILE)).unwrap();
        assert_eq!(state.downloaded_videos.len(), i + 1);
    }

    assert_eq!(
        dir_entries(&temp),
        vec![".stealth_progress.json", ".stealth_progress.lock"]
    );
}

#[test]
fn test_second_open_is_locked() {
    let temp = TempDir::new().unwrap();
    let _first = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();

    let second = ProgressStore::open(temp.path(), CorruptionPolicy::Abort);
    assert!(matches!(second, Err(StoreError::Locked(_))));
}

#[test]
fn test_lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    {
        let _store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();
    }
    assert!(ProgressStore::open(temp.path(), CorruptionPolicy::Abort).is_ok());
}

#[test]
fn test_corrupt_file_aborts_by_default() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(PROGRESS_FILE), "{ not json").unwrap();

    let result = ProgressStore::open(temp.path(), CorruptionPolicy::Abort);
    assert!(matches!(result, Err(StoreError::Corruption { .. })));

    // Nothing was touched
    let content = std::fs::read_to_string(temp.path().join(PROGRESS_FILE)).unwrap();
    assert_eq!(content, "{ not json");
}

#[test]
fn test_corrupt_file_backup_and_reset() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(PROGRESS_FILE), "{ not json").unwrap();

    let store = ProgressStore::open(temp.path(), CorruptionPolicy::BackupAndReset).unwrap();
    assert_eq!(store.state(), &ProgressState::default());

    let backups: Vec<String> = dir_entries(&temp)
        .into_iter()
        .filter(|n| n.starts_with(".stealth_progress.json.corrupt-"))
        .collect();
    assert_eq!(backups.len(), 1);

    let preserved = std::fs::read_to_string(temp.path().join(&backups[0])).unwrap();
    assert_eq!(preserved, "{ not json");
}

#[test]
fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();
        store.begin_attempt(&item("pending0001"), "s1", Utc::now()).unwrap();
        store
            .record_attempt(
                &item("gone0000001"),
                AttemptOutcome::Permanent,
                Some("Video unavailable"),
                "s1",
                Local::now(),
            )
            .unwrap();
    }

    let store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();
    let pending = store.record("pending0001").unwrap();
    assert_eq!(pending.status, DownloadStatus::Pending);
    assert_eq!(pending.attempts, 0);
    assert!(store.is_eligible("pending0001", 3));

    let gone = store.record("gone0000001").unwrap();
    assert_eq!(gone.status, DownloadStatus::FailedPermanent);
    assert_eq!(gone.attempts, 1);
    assert!(!store.is_eligible("gone0000001", 3));
}

#[test]
fn test_transient_failures_exhaust_budget() {
    let temp = TempDir::new().unwrap();
    let mut store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();
    let it = item("flaky000001");

    for _ in 0..3 {
        assert!(store.is_eligible(&it.id, 3));
        store
            .record_attempt(&it, AttemptOutcome::Transient, Some("timed out"), "s1", Local::now())
            .unwrap();
    }

    assert!(!store.is_eligible(&it.id, 3));
    assert!(store.retryable(3).is_empty());
    assert_eq!(store.retryable(5).len(), 1);
}

#[test]
fn test_error_message_truncated() {
    let temp = TempDir::new().unwrap();
    let mut store = ProgressStore::open(temp.path(), CorruptionPolicy::Abort).unwrap();
    let long = "x".repeat(500);

    let record = store
        .record_attempt(&item("long0000001"), AttemptOutcome::Transient, Some(&long), "s1", Local::now())
        .unwrap();

    assert!(record.last_error.unwrap().chars().count() <= 203);
}
