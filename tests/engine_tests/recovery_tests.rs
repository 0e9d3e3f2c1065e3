//! Tests for crash recovery
//!
//! A crash is simulated by dropping the engine without `close`: the rolling
//! worker stops, nothing is flushed, and the WAL segments stay on disk.
//!
//! These tests verify:
//! - Restoring records from the page store
//! - Replaying the WAL on top of (or instead of) the page store
//! - Duplicate first pages, broken chains and free-space reclamation
//! - Torn WAL tails and interrupted replays
//! - Unreadable pages behind an indexed key

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use pagekv::config::WalSyncStrategy;
use pagekv::record::RecordCodec;
use pagekv::storage::{PageAllocator, PageBufferPool, PageGeometry, PageState, PageStore};
use pagekv::wal::{LogOp, LogRecord, WriteAheadLog};
use pagekv::{BytesCodec, Config, Engine, Key, PageKvError};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .page_size(64)
        .region_shift(16)
        .read_cache_capacity(1024)
        .write_cache_capacity(1024)
        .recovery_threads(4)
        .build()
        .unwrap()
}

/// Recovery logs show up with `RUST_LOG=pagekv=debug cargo test`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open_engine(dir: &Path) -> Engine {
    init_tracing();
    Engine::open(test_config(dir), BytesCodec).unwrap()
}

/// Write records straight into the page file, bypassing engine and WAL
fn raw_codec(dir: &Path) -> RecordCodec {
    let config = test_config(dir);
    let geometry = PageGeometry::new(config.page_size, config.region_shift).unwrap();
    let store = Arc::new(PageStore::open(&config.data_path(), geometry).unwrap());
    let buffers = PageBufferPool::new(4, store.page_size());
    RecordCodec::new(store, PageAllocator::new(0), buffers)
}

/// Open the engine's WAL directory directly
fn raw_wal(dir: &Path) -> WriteAheadLog {
    let config = test_config(dir);
    WriteAheadLog::open(&config.redo_log_path(), &config.redo_log_suffix, WalSyncStrategy::EveryWrite)
        .unwrap()
}

fn log_update(wal: &WriteAheadLog, key: &[u8], value: &[u8]) {
    let header = LogOp::Update.header(key.len()).unwrap();
    wal.append(&[&header[..], key, value]).unwrap();
}

fn log_delete(wal: &WriteAheadLog, key: &[u8]) {
    let header = LogOp::Delete.header(key.len()).unwrap();
    wal.append(&[&header[..], key]).unwrap();
}

fn value_of(seed: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u32 * 31 + seed) as u8).collect()
}

// =============================================================================
// Page Store Recovery Tests
// =============================================================================

#[test]
fn test_recover_after_crash() {
    let temp = TempDir::new().unwrap();

    {
        let engine = open_engine(temp.path());
        for i in 0..50u32 {
            engine.put(format!("key{:03}", i), value_of(i, 10 + i as usize * 20)).unwrap();
        }
        // Crash: no close
    }

    let engine = open_engine(temp.path());
    assert_eq!(engine.len().unwrap(), 50);
    for i in 0..50u32 {
        assert_eq!(
            engine.get(format!("key{:03}", i)).unwrap(),
            Some(value_of(i, 10 + i as usize * 20))
        );
    }

    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.records_restored, 50);
    assert_eq!(summary.wal_records_replayed, 50);
    assert_eq!(summary.duplicate_keys, 0);
}

#[test]
fn test_recover_from_pages_after_roll() {
    let temp = TempDir::new().unwrap();

    {
        let engine = open_engine(temp.path());
        for i in 0..20u32 {
            engine.put(Key::from(format!("k{}", i)), value_of(i, 300)).unwrap();
        }
        engine.roll_wal().unwrap();
    }

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.records_restored, 20);
    assert_eq!(summary.wal_records_replayed, 0);
    assert_eq!(engine.get("k7").unwrap(), Some(value_of(7, 300)));
}

#[test]
fn test_recover_from_wal_alone() {
    let temp = TempDir::new().unwrap();

    {
        let engine = open_engine(temp.path());
        engine.put("a", b"1".to_vec()).unwrap();
        engine.put("b", b"2".to_vec()).unwrap();
        engine.put("a", b"3".to_vec()).unwrap();
        engine.remove("b").unwrap();
    }
    // Lose the page file entirely
    fs::remove_file(test_config(temp.path()).data_path()).unwrap();

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.records_restored, 0);
    assert_eq!(summary.wal_records_replayed, 4);
    assert_eq!(engine.get("a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(engine.get("b").unwrap(), None);
    assert_eq!(engine.keys().unwrap(), vec![Key::from("a")]);
}

#[test]
fn test_overwrite_and_remove_survive_crash() {
    let temp = TempDir::new().unwrap();

    {
        let engine = open_engine(temp.path());
        engine.put("k", value_of(1, 500)).unwrap();
        engine.put("k", value_of(2, 50)).unwrap();
        engine.put("gone", b"x".to_vec()).unwrap();
        engine.remove("gone").unwrap();
    }

    let engine = open_engine(temp.path());
    assert_eq!(engine.get("k").unwrap(), Some(value_of(2, 50)));
    assert_eq!(engine.get("gone").unwrap(), None);
    assert_eq!(engine.len().unwrap(), 1);
}

#[test]
fn test_repeated_crashes_keep_wal_bounded() {
    let temp = TempDir::new().unwrap();

    for round in 0..5u32 {
        let engine = open_engine(temp.path());
        engine.put("counter", round.to_be_bytes().to_vec()).unwrap();
        engine.put(format!("round{}", round), b"x".to_vec()).unwrap();
    }

    let engine = open_engine(temp.path());
    assert_eq!(engine.get("counter").unwrap(), Some(4u32.to_be_bytes().to_vec()));
    assert_eq!(engine.len().unwrap(), 6);
    // Replayed segments are deleted once their effects reach the page store
    assert_eq!(engine.wal_segment_count().unwrap(), 1);
}

#[test]
fn test_recovery_thread_count_does_not_matter() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_engine(temp.path());
        for i in 0..100i32 {
            engine.put(format!("{:04}", i), value_of(i as u32, (i as usize % 7) * 100)).unwrap();
        }
        engine.close().unwrap();
    }

    let mut seen = Vec::new();
    for threads in [1, 3, 8] {
        let config = Config {
            recovery_threads: threads,
            ..test_config(temp.path())
        };
        let engine = Engine::open(config, BytesCodec).unwrap();
        seen.push((engine.keys().unwrap(), engine.recovery_summary().unwrap().records_restored));
        engine.close().unwrap();
    }

    assert!(seen.iter().all(|s| s == &seen[0]));
    assert_eq!(seen[0].0.len(), 100);
}

// =============================================================================
// Page Store Anomaly Tests
// =============================================================================

#[test]
fn test_duplicate_first_pages_keep_lowest() {
    let temp = TempDir::new().unwrap();
    {
        let codec = raw_codec(temp.path());
        codec.build_record(b"dup", b"first").unwrap();
        codec.build_record(b"dup", &value_of(9, 400)).unwrap();
        codec.build_record(b"other", b"o").unwrap();
        codec.store().flush().unwrap();
    }

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();

    assert_eq!(engine.get("dup").unwrap(), Some(b"first".to_vec()));
    assert_eq!(engine.get("other").unwrap(), Some(b"o".to_vec()));
    assert_eq!(summary.records_restored, 2);
    assert_eq!(summary.duplicate_keys, 1);
    assert!(summary.orphan_pages_invalidated >= 1);
    engine.close().unwrap();

    // The dropped chain stays dropped
    let codec = raw_codec(temp.path());
    assert!(codec.restore_record(1).unwrap().is_none());
    assert_eq!(codec.store().page_state(1).unwrap(), Some(PageState::Invalid));
}

#[test]
fn test_gaps_below_high_water_mark_are_reclaimed() {
    let temp = TempDir::new().unwrap();
    {
        let codec = raw_codec(temp.path());
        codec.build_record(b"a", b"1").unwrap(); // page 0
        let b = codec.build_record(b"b", b"2").unwrap(); // page 1
        codec.build_record(b"c", b"3").unwrap(); // page 2
        codec.release_pages(&b.remove_page_ids()).unwrap();
        codec.store().flush().unwrap();
    }

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();

    assert_eq!(summary.records_restored, 2);
    assert_eq!(summary.pages_reclaimed, 1);
    assert_eq!(engine.next_page_id().unwrap(), 3);
    assert_eq!(engine.recycled_page_count().unwrap(), 1);

    // The reclaimed page is reused before a fresh one
    engine.put("d", b"4".to_vec()).unwrap();
    assert_eq!(engine.next_page_id().unwrap(), 3);
    assert_eq!(engine.recycled_page_count().unwrap(), 0);
}

#[test]
fn test_broken_chain_is_dropped_and_invalidated() {
    let temp = TempDir::new().unwrap();
    let torn_ids = {
        let codec = raw_codec(temp.path());
        codec.build_record(b"whole", b"w").unwrap();
        let torn = codec.build_record(b"torn", &value_of(3, 600)).unwrap();
        let ids = torn.page_ids();
        // Crash before the last page of the chain was written
        codec.store().mark_invalid(*ids.last().unwrap()).unwrap();
        codec.store().flush().unwrap();
        ids
    };

    let engine = open_engine(temp.path());
    assert_eq!(engine.get("whole").unwrap(), Some(b"w".to_vec()));
    assert_eq!(engine.get("torn").unwrap(), None);

    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.records_restored, 1);
    assert_eq!(summary.orphan_pages_invalidated as usize, torn_ids.len() - 1);
    // Only page 0 is referenced; the allocator resumes right after it
    assert_eq!(engine.next_page_id().unwrap(), 1);
}

#[test]
fn test_empty_store_recovers_nothing() {
    let temp = TempDir::new().unwrap();

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();

    assert_eq!(summary.records_restored, 0);
    assert_eq!(summary.pages_scanned, 0);
    assert_eq!(engine.next_page_id().unwrap(), 0);
}

// =============================================================================
// WAL Recovery Tests
// =============================================================================

#[test]
fn test_torn_wal_tail_is_discarded() {
    let temp = TempDir::new().unwrap();
    let segment = {
        let engine = open_engine(temp.path());
        engine.put("a", b"1".to_vec()).unwrap();
        engine.put("b", b"2".to_vec()).unwrap();
        test_config(temp.path()).redo_log_path()
    };

    // Tear the newest segment: a length prefix with only part of its body
    let newest = fs::read_dir(&segment)
        .unwrap()
        .map(|e| e.unwrap().path())
        .max()
        .unwrap();
    let mut file = OpenOptions::new().append(true).open(&newest).unwrap();
    file.write_all(&[0, 0, 0, 40, 1, 1, b'c']).unwrap();
    drop(file);

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();
    assert!(summary.wal_truncated);
    assert_eq!(summary.wal_records_replayed, 2);
    assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get("c").unwrap(), None);
}

#[test]
fn test_garbled_wal_record_is_skipped() {
    let temp = TempDir::new().unwrap();
    let redo_dir = {
        let engine = open_engine(temp.path());
        engine.put("a", b"1".to_vec()).unwrap();
        test_config(temp.path()).redo_log_path()
    };

    let newest = fs::read_dir(&redo_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .max()
        .unwrap();
    let mut file = OpenOptions::new().append(true).open(&newest).unwrap();
    // Complete record with an unknown opcode, then a valid DEL of "a"
    file.write_all(&[0, 0, 0, 2, 9, 0]).unwrap();
    file.write_all(&[0, 0, 0, 3, 2, 1, b'a']).unwrap();
    drop(file);

    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.wal_records_skipped, 1);
    assert_eq!(summary.wal_records_replayed, 2);
    assert_eq!(engine.get("a").unwrap(), None);
}

#[test]
fn test_interrupted_replay_keeps_write_order() {
    let temp = TempDir::new().unwrap();
    {
        let wal = raw_wal(temp.path());
        log_update(&wal, b"k", b"v1");
        log_update(&wal, b"d", b"doomed");
        wal.roll().unwrap();
        log_update(&wal, b"k", b"v2");
        log_delete(&wal, b"d");
        wal.roll().unwrap();
    }

    // A startup that dies on the second segment
    {
        let wal = raw_wal(temp.path());
        let result = wal.redo(|payload| match LogRecord::decode(payload)? {
            LogRecord::Update { value, .. } if value == b"v2" => {
                Err(std::io::Error::other("interrupted").into())
            }
            _ => Ok(()),
        });
        assert!(matches!(result, Err(PageKvError::Io(_))));
    }

    let engine = open_engine(temp.path());
    assert_eq!(engine.get("k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.get("d").unwrap(), None);
    assert_eq!(engine.wal_segment_count().unwrap(), 1);
    drop(engine);

    // Replay did not log again: a crash right after startup changes nothing
    let engine = open_engine(temp.path());
    let summary = engine.recovery_summary().unwrap();
    assert_eq!(summary.wal_records_replayed, 0);
    assert_eq!(engine.get("k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.keys().unwrap(), vec![Key::from("k")]);
}

#[test]
fn test_get_of_unreadable_pages_is_page_fault() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_engine(temp.path());
        engine.put("k", value_of(3, 300)).unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(temp.path());
    assert!(engine.contains_key("k").unwrap());

    // Invalidate every page through a second mapping of the same file
    let config = test_config(temp.path());
    let geometry = PageGeometry::new(config.page_size, config.region_shift).unwrap();
    let side = PageStore::open(&config.data_path(), geometry).unwrap();
    for id in 0..engine.next_page_id().unwrap() {
        side.mark_invalid(id).unwrap();
    }

    assert!(matches!(engine.get("k"), Err(PageKvError::PageFault(_))));
    assert!(engine.contains_key("k").unwrap());
}
