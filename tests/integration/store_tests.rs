//! Batch store behavior against an on-disk database

use crate::support::{at, record};
use star_harvest::config::RenamePolicy;
use star_harvest::storage::{BatchStore, RecordStore, StorageError};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> BatchStore {
    BatchStore::open(&dir.path().join("harvest.db"), 2).unwrap()
}

#[test]
fn test_same_instant_upsert_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .upsert_batch_at(&[record(42, "octo", "answer", 10, at(1))], at(5))
        .unwrap();
    store
        .upsert_batch_at(&[record(42, "octo", "answer", 15, at(1))], at(5))
        .unwrap();

    assert_eq!(store.count().unwrap(), 1);
    let history = store.star_history(42).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].star_count, 15);
}

#[test]
fn test_distinct_instants_accumulate_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .upsert_batch_at(&[record(42, "octo", "answer", 10, at(1))], at(5))
        .unwrap();
    store
        .upsert_batch_at(&[record(42, "octo", "answer", 15, at(2))], at(6))
        .unwrap();

    let history = store.star_history(42).unwrap();
    let counts: Vec<i64> = history.iter().map(|o| o.star_count).collect();
    assert_eq!(counts, vec![10, 15]);
    assert!(history[0].observed_at < history[1].observed_at);

    let repo = store.get_repository(42).unwrap().unwrap();
    assert_eq!(repo.updated_at.as_deref(), Some("2024-03-01T02:00:00.000000Z"));
    assert_eq!(repo.last_crawled_at, "2024-03-01T06:00:00.000000Z");

    let latest = store.latest_snapshots(None).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].star_count, 15);
}

#[test]
fn test_failed_batch_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    {
        let conn = store.pool().get().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_observations BEFORE INSERT ON repository_stars
             BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
        )
        .unwrap();
    }

    let result = store.upsert_batch(&[
        record(1, "octo", "one", 1, at(1)),
        record(2, "octo", "two", 2, at(1)),
    ]);

    assert!(matches!(result, Err(StorageError::Sqlite(_))));
    assert_eq!(store.count().unwrap(), 0);
    assert!(store.get_repository(1).unwrap().is_none());
    let state = store.pool().state();
    assert_eq!(state.connections, store.pool().max_size());
    assert_eq!(state.idle_connections, state.connections);
}

#[test]
fn test_rename_preserved_by_default() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .upsert_batch_at(&[record(7, "old-org", "tool", 1, at(1))], at(3))
        .unwrap();
    store
        .upsert_batch_at(&[record(7, "new-org", "tool", 2, at(2))], at(4))
        .unwrap();

    let repo = store.get_repository(7).unwrap().unwrap();
    assert_eq!(repo.owner, "old-org");
    assert_eq!(repo.full_name, "old-org/tool");
    assert_eq!(repo.updated_at.as_deref(), Some("2024-03-01T02:00:00.000000Z"));
}

#[test]
fn test_rename_overwritten_when_configured() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).with_rename_policy(RenamePolicy::Overwrite);

    store
        .upsert_batch_at(&[record(7, "old-org", "tool", 1, at(1))], at(3))
        .unwrap();
    store
        .upsert_batch_at(&[record(7, "new-org", "tool-rs", 2, at(2))], at(4))
        .unwrap();

    let repo = store.get_repository(7).unwrap().unwrap();
    assert_eq!(repo.owner, "new-org");
    assert_eq!(repo.name, "tool-rs");
    assert_eq!(repo.full_name, "new-org/tool-rs");
    assert_eq!(store.star_history(7).unwrap().len(), 2);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = open_store(&dir);
        store
            .upsert_batch(&[record(1, "octo", "one", 3, at(1))])
            .unwrap();
    }

    let store = open_store(&dir);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.star_totals().unwrap().total_stars, 3);
}
