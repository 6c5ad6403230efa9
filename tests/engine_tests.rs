//! Tests for Engine
//!
//! These tests verify:
//! - CRUD round-trips and typed failure conditions
//! - Block capacity bounds across many inserts
//! - Transparent index rebuild after corruption or deletion
//! - Pagination ordering across shards
//! - Store lifecycle (clear / full reset)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use shardstore::{Config, Engine, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().root_dir(temp_dir.path()).build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn setup_temp_engine_with_capacity(capacity: usize) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .max_records_per_file(capacity)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

/// Snapshot every file under a directory with its content
fn snapshot_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut snapshot = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let name = path.strip_prefix(dir).unwrap().to_string_lossy().to_string();
                snapshot.insert(name, fs::read(&path).unwrap());
            }
        }
    }
    snapshot
}

/// Insert with a short pause so successive records get distinct timestamps
fn insert_paced(engine: &Engine, id: &str, data: serde_json::Value) {
    engine.insert(id, data).unwrap();
    thread::sleep(Duration::from_millis(2));
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_skeleton() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("mydb");

    let config = Config::builder().root_dir(&root).build();
    let _engine = Engine::open(config).unwrap();

    assert!(root.exists());
    assert!(root.join("active").exists());
    assert!(root.join("manifest.json").exists());
}

#[test]
fn test_engine_insert_get_round_trip() {
    let (_temp, engine) = setup_temp_engine();

    let inserted = engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
    let fetched = engine.get("ab000001").unwrap();

    assert_eq!(fetched.id, "ab000001");
    assert_eq!(fetched.data, json!({"name": "Ann"}));
    assert_eq!(fetched.hash, inserted.hash);
}

#[test]
fn test_engine_get_nonexistent_record() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.get("zz999999");
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[test]
fn test_engine_insert_rejects_short_id() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.insert("a", json!({}));
    assert!(matches!(result, Err(StoreError::InvalidId(_))));
}

#[test]
fn test_engine_duplicate_insert_rejected() {
    let (_temp, engine) = setup_temp_engine();

    engine.insert("rec-0001", json!({"v": 1})).unwrap();
    let result = engine.insert("rec-0001", json!({"v": 2}));

    assert!(matches!(result, Err(StoreError::DuplicateKey(_))));

    // Original record unchanged
    let record = engine.get("rec-0001").unwrap();
    assert_eq!(record.data, json!({"v": 1}));
}

#[test]
fn test_engine_update() {
    let (_temp, engine) = setup_temp_engine();

    let original = engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
    let before = engine.last_update("ab000001").unwrap();

    thread::sleep(Duration::from_millis(2));
    let updated = engine.update("ab000001", json!({"name": "Annie"})).unwrap();

    assert_eq!(updated.data, json!({"name": "Annie"}));
    assert_ne!(updated.hash, original.hash);

    let after = engine.last_update("ab000001").unwrap();
    assert!(after > before, "update must bump last_update");

    assert_eq!(engine.get("ab000001").unwrap().data, json!({"name": "Annie"}));
}

#[test]
fn test_engine_update_missing_record_leaves_disk_untouched() {
    let (temp, engine) = setup_temp_engine();
    engine.insert("ab000001", json!({"name": "Ann"})).unwrap();

    let before = snapshot_dir(temp.path());
    let result = engine.update("ab999999", json!({"name": "Ghost"}));

    assert!(matches!(result, Err(StoreError::NotFound(_))));
    assert_eq!(snapshot_dir(temp.path()), before);
}

#[test]
fn test_engine_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
    engine.delete("ab000001").unwrap();

    assert!(matches!(engine.get("ab000001"), Err(StoreError::NotFound(_))));
    assert!(engine.list_page(10, 0).unwrap().is_empty());
}

#[test]
fn test_engine_delete_missing_record_leaves_disk_untouched() {
    let (temp, engine) = setup_temp_engine();
    engine.insert("ab000001", json!({"name": "Ann"})).unwrap();

    let before = snapshot_dir(temp.path());
    let result = engine.delete("ab999999");

    assert!(matches!(result, Err(StoreError::NotFound(_))));
    assert_eq!(snapshot_dir(temp.path()), before);
}

#[test]
fn test_engine_delete_last_record_removes_block_file() {
    let (temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"n": 1})).unwrap();
    let block_path = temp.path().join("active/ab/block_001.json");
    assert!(block_path.exists());

    engine.delete("ab000001").unwrap();
    assert!(!block_path.exists());
}

#[test]
fn test_engine_no_backup_files_left_after_success() {
    let (temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"v": 1})).unwrap();
    engine.update("ab000001", json!({"v": 2})).unwrap();
    engine.delete("ab000001").unwrap();

    for entry in fs::read_dir(temp.path().join("active/ab")).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().to_string();
        assert!(
            !name.ends_with("backup.json"),
            "orphaned backup left behind: {}",
            name
        );
    }
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_engine_capacity_spills_into_new_blocks() {
    let capacity = 3;
    let (temp, engine) = setup_temp_engine_with_capacity(capacity);

    // capacity + 1 records sharing a prefix must spread over >= 2 blocks
    for i in 0..capacity + 1 {
        engine.insert(&format!("aa{:04}", i), json!({"i": i})).unwrap();
    }

    let shard_dir = temp.path().join("active/aa");
    let mut block_count = 0;
    for entry in fs::read_dir(&shard_dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if !name.starts_with("block_") {
            continue;
        }
        block_count += 1;

        let records: Vec<serde_json::Value> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(
            records.len() <= capacity,
            "block {} holds {} records, capacity is {}",
            name,
            records.len(),
            capacity
        );
    }
    assert!(block_count >= 2, "expected >= 2 blocks, got {}", block_count);

    // Every record still readable
    for i in 0..capacity + 1 {
        assert!(engine.get(&format!("aa{:04}", i)).is_ok());
    }
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_engine_rebuilds_deleted_prefix_index() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
        engine.insert("ab000002", json!({"name": "Bob"})).unwrap();
    }

    // Simulate corruption: the index file disappears, blocks survive
    fs::remove_file(temp_dir.path().join("active/ab/index.json")).unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    let record = engine.get("ab000001").unwrap();

    assert_eq!(record.data, json!({"name": "Ann"}));
    assert!(engine.rebuild_count() >= 1, "recovery must go through rebuild");

    // The rebuilt index is persisted for the next load
    assert!(temp_dir.path().join("active/ab/index.json").exists());
}

#[test]
fn test_engine_rebuilds_corrupt_prefix_index() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
    }

    fs::write(temp_dir.path().join("active/ab/index.json"), b"{not json!").unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    assert_eq!(engine.get("ab000001").unwrap().data, json!({"name": "Ann"}));
    assert!(engine.rebuild_count() >= 1);
}

#[test]
fn test_engine_rebuilds_corrupt_main_index() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        engine.insert("ab000001", json!({"n": 1})).unwrap();
        engine.insert("cd000001", json!({"n": 2})).unwrap();
    }

    fs::write(temp_dir.path().join("global_index.json"), b"garbage").unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    let page = engine.list_page(10, 0).unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(engine.shard_count().unwrap(), 2);
}

// =============================================================================
// Pagination Tests
// =============================================================================

#[test]
fn test_engine_list_page_orders_by_last_update_desc() {
    let (_temp, engine) = setup_temp_engine();

    // Spread across two prefixes; paced inserts give distinct timestamps
    insert_paced(&engine, "aa0001", json!({"n": 1}));
    insert_paced(&engine, "bb0001", json!({"n": 2}));
    insert_paced(&engine, "aa0002", json!({"n": 3}));
    insert_paced(&engine, "bb0002", json!({"n": 4}));

    let page = engine.list_page(10, 0).unwrap();
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["bb0002", "aa0002", "bb0001", "aa0001"]);
}

#[test]
fn test_engine_list_page_slicing() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..5 {
        insert_paced(&engine, &format!("aa{:04}", i), json!({"i": i}));
    }

    let page = engine.list_page(2, 1).unwrap();
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["aa0003", "aa0002"]);

    assert!(engine.list_page(10, 5).unwrap().is_empty());
    assert!(engine.list_page(0, 0).unwrap().is_empty());
}

#[test]
fn test_engine_list_page_update_moves_record_to_front() {
    let (_temp, engine) = setup_temp_engine();

    insert_paced(&engine, "aa0001", json!({"n": 1}));
    insert_paced(&engine, "bb0001", json!({"n": 2}));

    engine.update("aa0001", json!({"n": 10})).unwrap();

    let page = engine.list_page(10, 0).unwrap();
    assert_eq!(page[0].id, "aa0001");
}

// =============================================================================
// End-to-End Scenario
// =============================================================================

#[test]
fn test_engine_end_to_end_crud() {
    let (_temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"name": "Ann"})).unwrap();
    assert_eq!(engine.get("ab000001").unwrap().data, json!({"name": "Ann"}));

    let before = engine.last_update("ab000001").unwrap();
    thread::sleep(Duration::from_millis(2));

    let updated = engine.update("ab000001", json!({"name": "Annie"})).unwrap();
    assert_eq!(updated.data, json!({"name": "Annie"}));
    assert!(engine.last_update("ab000001").unwrap() > before);

    engine.delete("ab000001").unwrap();
    assert!(matches!(engine.get("ab000001"), Err(StoreError::NotFound(_))));
    assert!(engine.list_page(10, 0).unwrap().is_empty());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_clear_keeps_skeleton() {
    let (temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"n": 1})).unwrap();
    engine.insert("cd000001", json!({"n": 2})).unwrap();

    engine.clear().unwrap();

    assert!(temp.path().join("active").exists());
    assert!(!temp.path().join("active/ab").exists());
    assert_eq!(engine.shard_count().unwrap(), 0);
    assert!(engine.list_page(10, 0).unwrap().is_empty());
    assert!(matches!(engine.get("ab000001"), Err(StoreError::NotFound(_))));
}

#[test]
fn test_engine_usable_after_clear() {
    let (_temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"n": 1})).unwrap();
    engine.clear().unwrap();

    // Same id can be inserted again
    engine.insert("ab000001", json!({"n": 2})).unwrap();
    assert_eq!(engine.get("ab000001").unwrap().data, json!({"n": 2}));
}

#[test]
fn test_engine_full_reset_recreates_manifest() {
    let (temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({"n": 1})).unwrap();
    engine.full_reset().unwrap();

    assert!(temp.path().join("active").exists());
    assert!(temp.path().join("manifest.json").exists());
    assert!(engine.list_page(10, 0).unwrap().is_empty());
}

// =============================================================================
// Introspection Tests
// =============================================================================

#[test]
fn test_engine_counts() {
    let (_temp, engine) = setup_temp_engine();

    engine.insert("ab000001", json!({})).unwrap();
    engine.insert("ab000002", json!({})).unwrap();
    engine.insert("cd000001", json!({})).unwrap();

    assert_eq!(engine.record_count().unwrap(), 3);
    assert_eq!(engine.shard_count().unwrap(), 2);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_inserts_across_shards() {
    use std::sync::Arc;

    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open_path(temp_dir.path()).unwrap());

    let mut handles = vec![];
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let id = format!("t{}{:04}", t, i);
                engine.insert(&id, json!({"t": t, "i": i})).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.record_count().unwrap(), 100);
    for t in 0..4 {
        for i in 0..25 {
            let id = format!("t{}{:04}", t, i);
            assert_eq!(engine.get(&id).unwrap().data, json!({"t": t, "i": i}));
        }
    }
}

#[test]
fn test_engine_concurrent_reads() {
    use std::sync::Arc;

    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open_path(temp_dir.path()).unwrap());

    for i in 0..50 {
        engine.insert(&format!("aa{:04}", i), json!({"i": i})).unwrap();
    }

    let mut handles = vec![];
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let record = engine.get(&format!("aa{:04}", i)).unwrap();
                assert_eq!(record.data, json!({"i": i}));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
