//! Integration tests for long-term memory persistence
//!
//! Both stores must hand back exactly what was written when a fresh
//! `Memory` is loaded over the same location.

use cadence_engine::db::{Database, SqliteStore};
use cadence_engine::llm::Gateway;
use cadence_engine::memory::{JsonFileStore, LongTermStore, Memory, SnapshotLimits};
use sdk::errors::PipelineError;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn memory_over(store: Arc<dyn LongTermStore>, limits: SnapshotLimits) -> Memory {
    Memory::load(Arc::new(Gateway::new()), store, limits)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_json_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory_storage.json");

    let memory = memory_over(Arc::new(JsonFileStore::new(&path)), SnapshotLimits::default()).await;
    memory.put_long_term("weather", json!({"tip": "check the forecast"})).await.unwrap();
    memory.put_long_term("food", json!(["sandwiches", "fruit"])).await.unwrap();
    memory.put_long_term("weather", json!("bring umbrellas")).await.unwrap();
    drop(memory);

    let reloaded = memory_over(Arc::new(JsonFileStore::new(&path)), SnapshotLimits::default()).await;
    let keys: Vec<String> = reloaded
        .long_term_entries()
        .await
        .into_iter()
        .map(|e| e.key)
        .collect();

    // Rewriting a key moves it to the newest position
    assert_eq!(keys, vec!["food", "weather"]);
    assert_eq!(reloaded.get_long_term("weather").await, Some(json!("bring umbrellas")));
}

#[tokio::test]
async fn test_sqlite_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cadence.db");

    let db = Database::new(&db_path).await.unwrap();
    let memory = memory_over(
        Arc::new(SqliteStore::new(db.pool().clone())),
        SnapshotLimits::default(),
    )
    .await;
    memory.put_long_term("lessons", json!(["start early"])).await.unwrap();
    memory.put_long_term("metrics", json!({"minutes": 45})).await.unwrap();
    drop(memory);
    db.close().await.unwrap();

    let db = Database::new(&db_path).await.unwrap();
    let reloaded = memory_over(
        Arc::new(SqliteStore::new(db.pool().clone())),
        SnapshotLimits::default(),
    )
    .await;

    let entries = reloaded.long_term_entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, "lessons");
    assert_eq!(reloaded.get_long_term("metrics").await, Some(json!({"minutes": 45})));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_json_file_is_persistence_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory_storage.json");
    tokio::fs::write(&path, "[1, 2, 3]").await.unwrap();

    let result = Memory::load(
        Arc::new(Gateway::new()),
        Arc::new(JsonFileStore::new(&path)),
        SnapshotLimits::default(),
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Persistence(_))));
}

#[tokio::test]
async fn test_snapshot_prefers_recent_entries_within_budget() {
    let dir = TempDir::new().unwrap();
    let limits = SnapshotLimits {
        char_budget: 40,
        entry_char_limit: 20,
    };
    let memory = memory_over(
        Arc::new(JsonFileStore::new(dir.path().join("memory_storage.json"))),
        limits,
    )
    .await;

    memory.put_long_term("old", json!("first lesson")).await.unwrap();
    memory.put_long_term("new", json!("x".repeat(100))).await.unwrap();

    let snapshot = memory.snapshot().await;

    assert_eq!(snapshot[0].0, "new");
    let truncated = snapshot[0].1.as_str().unwrap();
    assert!(truncated.ends_with("..."));
    assert!(snapshot.iter().map(|(k, _)| k.as_str()).all(|k| k == "new" || k == "old"));
}
