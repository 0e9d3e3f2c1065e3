//! Tests for Engine
//!
//! These tests verify:
//! - Basic put/get/remove operations
//! - Values spanning many pages
//! - Lifecycle (new/initialize/open/close)
//! - Key typing and value codecs
//! - Page reuse across overwrites

use std::path::Path;

use pagekv::{
    BincodeCodec, BytesCodec, Config, Engine, Key, KeyType, PageKvError, StringCodec,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Small pages and regions so tests stay fast
fn test_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .page_size(64)
        .region_shift(16)
        .read_cache_capacity(1024)
        .write_cache_capacity(1024)
        .key_lock_stripes(64)
        .recovery_threads(2)
        .build()
        .unwrap()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();
    (temp_dir, engine)
}

fn value_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = Engine::open(test_config(&data_dir), BytesCodec).unwrap();

    assert!(data_dir.join("pagekv.data").exists());
    assert!(data_dir.join("pagekv.lock").exists());
    assert!(data_dir.join("redo").is_dir());
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("hello", b"world".to_vec()).unwrap();

    assert_eq!(engine.get("hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    assert_eq!(engine.get("nonexistent").unwrap(), None);
}

#[test]
fn test_engine_put_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("key", b"value1".to_vec()).unwrap();
    engine.put("key", b"value2".to_vec()).unwrap();

    assert_eq!(engine.get("key").unwrap(), Some(b"value2".to_vec()));
    assert_eq!(engine.len().unwrap(), 1);
}

#[test]
fn test_engine_remove() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("key", b"value".to_vec()).unwrap();
    assert!(engine.contains_key("key").unwrap());

    engine.remove("key").unwrap();
    assert_eq!(engine.get("key").unwrap(), None);
    assert!(!engine.contains_key("key").unwrap());
    assert!(engine.is_empty().unwrap());
}

#[test]
fn test_engine_remove_nonexistent_key_logs_nothing() {
    let (_temp, engine) = setup_temp_engine();

    engine.remove("nonexistent").unwrap();
    assert_eq!(engine.logged_bytes().unwrap(), 0);
}

#[test]
fn test_engine_multiple_keys_sorted() {
    let (_temp, engine) = setup_temp_engine();

    for key in ["delta", "alpha", "charlie", "bravo"] {
        engine.put(key, key.as_bytes().to_vec()).unwrap();
    }

    assert_eq!(
        engine.keys().unwrap(),
        vec![
            Key::from("alpha"),
            Key::from("bravo"),
            Key::from("charlie"),
            Key::from("delta")
        ]
    );
    assert_eq!(engine.get("charlie").unwrap(), Some(b"charlie".to_vec()));
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("empty", Vec::new()).unwrap();
    assert_eq!(engine.get("empty").unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_large_value_spans_pages() {
    let (_temp, engine) = setup_temp_engine();
    let value = value_of(10_000);

    engine.put("big", value.clone()).unwrap();

    // 127-byte pages: the value needs dozens of them
    assert!(engine.next_page_id().unwrap() > 50);
    assert_eq!(engine.get("big").unwrap(), Some(value));
}

#[test]
fn test_engine_put_same_value_is_noop() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("k", b"v".to_vec()).unwrap();
    let logged = engine.logged_bytes().unwrap();
    let next_page = engine.next_page_id().unwrap();

    engine.put("k", b"v".to_vec()).unwrap();

    assert_eq!(engine.logged_bytes().unwrap(), logged);
    assert_eq!(engine.next_page_id().unwrap(), next_page);
}

#[test]
fn test_engine_overwrite_recycles_pages() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..100u32 {
        engine.put("k", i.to_be_bytes().to_vec()).unwrap();
    }

    // Each overwrite frees the previous single page for the next one
    assert!(engine.next_page_id().unwrap() <= 2);
    assert_eq!(engine.get("k").unwrap(), Some(99u32.to_be_bytes().to_vec()));
}

#[test]
fn test_engine_remove_recycles_pages() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("k", value_of(1000)).unwrap();
    let used = engine.next_page_id().unwrap() as usize;
    engine.remove("k").unwrap();

    assert_eq!(engine.recycled_page_count().unwrap(), used);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_engine_key_length_limit() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("a".repeat(255), b"ok".to_vec()).unwrap();
    let result = engine.put("a".repeat(256), b"too long".to_vec());

    assert!(matches!(result, Err(PageKvError::InvalidArgument(_))));
    assert!(matches!(
        engine.get("a".repeat(256)),
        Err(PageKvError::InvalidArgument(_))
    ));
}

#[test]
fn test_engine_key_type_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        key_type: KeyType::Int,
        ..test_config(temp_dir.path())
    };
    let engine = Engine::open(config, BytesCodec).unwrap();

    engine.put(7i32, b"seven".to_vec()).unwrap();
    assert!(matches!(
        engine.put("seven", b"x".to_vec()),
        Err(PageKvError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.put(7i64, b"x".to_vec()),
        Err(PageKvError::InvalidArgument(_))
    ));
    assert_eq!(engine.get(7i32).unwrap(), Some(b"seven".to_vec()));
}

#[test]
fn test_engine_numeric_keys_ordered() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        key_type: KeyType::Double,
        ..test_config(temp_dir.path())
    };
    let engine = Engine::open(config, BytesCodec).unwrap();

    for k in [2.5f64, -1.0, 100.25, 0.0] {
        engine.put(k, k.to_string().into_bytes()).unwrap();
    }

    assert_eq!(
        engine.keys().unwrap(),
        vec![
            Key::Double(-1.0),
            Key::Double(0.0),
            Key::Double(2.5),
            Key::Double(100.25)
        ]
    );
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_uninitialized() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()), BytesCodec);

    assert!(!engine.is_initialized());
    assert!(matches!(
        engine.put("k", b"v".to_vec()),
        Err(PageKvError::Uninitialized)
    ));
    assert!(matches!(engine.get("k"), Err(PageKvError::Uninitialized)));
    assert!(matches!(engine.remove("k"), Err(PageKvError::Uninitialized)));
    // Nothing touched the filesystem yet
    assert!(!temp_dir.path().join("pagekv.data").exists());

    engine.initialize().unwrap();
    engine.initialize().unwrap();
    assert!(engine.is_initialized());
    engine.put("k", b"v".to_vec()).unwrap();
}

#[test]
fn test_config_rejects_page_size_below_header() {
    let temp_dir = TempDir::new().unwrap();

    // 4 rounds up to an 8-byte page: 7 payload bytes, less than a record header
    let result = Config::builder().data_dir(temp_dir.path()).page_size(4).build();
    assert!(matches!(result, Err(PageKvError::Config(_))));

    // 10 rounds up to a 16-byte page with a 15-byte payload
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .page_size(10)
        .region_shift(16)
        .build()
        .unwrap();
    let engine = Engine::open(config, BytesCodec).unwrap();
    assert_eq!(engine.page_size().unwrap(), 15);
    engine.put("k", vec![1u8; 40]).unwrap();
    assert_eq!(engine.get("k").unwrap(), Some(vec![1u8; 40]));
}

#[test]
fn test_engine_validates_hand_built_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        page_size: 4,
        ..Config::default()
    };

    let engine = Engine::new(config, BytesCodec);
    assert!(matches!(engine.initialize(), Err(PageKvError::Config(_))));
    assert!(!engine.is_initialized());
    assert!(!temp_dir.path().join("pagekv.data").exists());
}

#[test]
fn test_engine_close_and_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();
        engine.put("persist", b"me".to_vec()).unwrap();
        engine.put("gone", b"soon".to_vec()).unwrap();
        engine.remove("gone").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();
    assert_eq!(engine.get("persist").unwrap(), Some(b"me".to_vec()));
    assert_eq!(engine.get("gone").unwrap(), None);
    assert_eq!(engine.len().unwrap(), 1);
}

#[test]
fn test_engine_directory_is_locked() {
    let temp_dir = TempDir::new().unwrap();
    let _engine = Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();

    let second = Engine::open(test_config(temp_dir.path()), BytesCodec);
    assert!(matches!(second, Err(PageKvError::Storage(_))));
}

#[test]
fn test_engine_lock_released_on_close() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();
    engine.close().unwrap();

    Engine::open(test_config(temp_dir.path()), BytesCodec).unwrap();
}

#[test]
fn test_engine_flush() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("k", b"v".to_vec()).unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get("k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_engine_roll_wal_resets_counter() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("k", b"v".to_vec()).unwrap();
    assert!(engine.logged_bytes().unwrap() > 0);

    engine.roll_wal().unwrap();

    assert_eq!(engine.logged_bytes().unwrap(), 0);
    assert_eq!(engine.roll_count().unwrap(), 1);
    assert_eq!(engine.wal_segment_count().unwrap(), 1);
    assert_eq!(engine.get("k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_engine_page_size_reported() {
    let (_temp, engine) = setup_temp_engine();
    assert_eq!(engine.page_size().unwrap(), 127);
    assert_eq!(engine.config().page_size, 64);
}

// =============================================================================
// Value Codec Tests
// =============================================================================

#[test]
fn test_engine_string_values() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(temp_dir.path()), StringCodec).unwrap();

    engine.put("greeting", "héllo wörld".to_string()).unwrap();
    assert_eq!(
        engine.get("greeting").unwrap(),
        Some("héllo wörld".to_string())
    );
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: u64,
    owner: String,
    balances: Vec<i64>,
}

#[test]
fn test_engine_bincode_values() {
    let temp_dir = TempDir::new().unwrap();
    let account = Account {
        id: 42,
        owner: "ada".to_string(),
        balances: (0..100).collect(),
    };

    {
        let engine =
            Engine::open(test_config(temp_dir.path()), BincodeCodec::<Account>::new()).unwrap();
        engine.put(account.owner.as_str(), account.clone()).unwrap();
        assert_eq!(engine.get("ada").unwrap(), Some(account.clone()));
        engine.close().unwrap();
    }

    let engine = Engine::open(test_config(temp_dir.path()), BincodeCodec::<Account>::new()).unwrap();
    assert_eq!(engine.get("ada").unwrap(), Some(account));
}

#[test]
fn test_engine_open_path_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path()).unwrap();

    engine.put("k", b"v".to_vec()).unwrap();
    assert_eq!(engine.get("k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(engine.config().page_size, 256);
}
