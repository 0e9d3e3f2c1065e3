//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Serialize operations on one key through the per-key lock registry
//! - Log every mutation to the WAL before touching pages
//! - Keep the index, page store and value caches consistent
//! - Restore state on startup: page scan, then WAL redo
//! - Run the rolling worker and apply write backpressure
//!
//! ## Concurrency Model
//!
//! - Operations on one key are serialized by its lock stripe
//! - Operations on different keys run in parallel; the index lock is held
//!   only for single map operations
//! - Readers of a cached value take no lock beyond the cache shard
//!
//! ## Lock ordering
//! ```text
//! key stripe → roll gate (shared) → WAL segment → index → record → page latch
//! ```

mod bitset;
mod cache;
mod dir_lock;
mod key_lock;
mod recovery;
mod rolling;

pub use recovery::RecoverySummary;

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::codec::{BytesCodec, ValueCodec};
use crate::config::Config;
use crate::error::{PageKvError, Result};
use crate::index::Index;
use crate::key::{Key, KeyType};
use crate::record::{LockOp, RecordCodec};
use crate::storage::{PageAllocator, PageBufferPool, PageGeometry, PageId, PageStore};
use crate::wal::{LogOp, LogRecord, RedoSummary, WriteAheadLog};

use cache::ValueCache;
use dir_lock::DirLock;
use key_lock::KeyLocks;
use rolling::{RollControl, RollingWorker};

/// The main storage engine
///
/// Constructed cheaply with [`Engine::new`]; all I/O happens in
/// [`Engine::initialize`]. Every operation before that fails with
/// [`PageKvError::Uninitialized`].
pub struct Engine<C: ValueCodec = BytesCodec> {
    config: Config,
    codec: Arc<C>,
    core: OnceLock<Core<C>>,

    /// Serializes initialization
    init_lock: Mutex<()>,
}

impl<C: ValueCodec> Engine<C> {
    /// Create an engine without touching the filesystem
    pub fn new(config: Config, codec: C) -> Self {
        Self {
            config,
            codec: Arc::new(codec),
            core: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Create and initialize in one step
    pub fn open(config: Config, codec: C) -> Result<Self> {
        let engine = Self::new(config, codec);
        engine.initialize()?;
        Ok(engine)
    }

    /// Open files, recover, and start the rolling worker
    ///
    /// Idempotent: later calls return immediately. Concurrent callers wait
    /// for the first one to finish.
    pub fn initialize(&self) -> Result<()> {
        let _init = self.init_lock.lock();
        if self.core.get().is_some() {
            return Ok(());
        }
        let core = Core::open(&self.config, Arc::clone(&self.codec))?;
        if self.core.set(core).is_err() {
            return Err(PageKvError::Storage("engine initialized twice".to_string()));
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.core.get().is_some()
    }

    /// Insert or replace a value
    ///
    /// Storing a value equal to the cached one is a no-op and writes
    /// nothing to the WAL.
    pub fn put(&self, key: impl Into<Key>, value: C::Value) -> Result<()> {
        self.core()?.put(key.into(), value)
    }

    /// Look up a value
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<C::Value>> {
        self.core()?.get(key.into())
    }

    /// Delete a key; deleting a missing key is a no-op
    pub fn remove(&self, key: impl Into<Key>) -> Result<()> {
        self.core()?.remove(key.into())
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> Result<bool> {
        Ok(self.core()?.index.contains_key(&key.into()))
    }

    /// Every key in ascending order
    pub fn keys(&self) -> Result<Vec<Key>> {
        Ok(self.core()?.index.keys())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.core()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.core()?.index.is_empty())
    }

    /// Flush the page store and sync the active WAL segment
    pub fn flush(&self) -> Result<()> {
        let core = self.core()?;
        core.store().flush()?;
        core.wal.sync()
    }

    /// Roll the WAL now and wait for the roll to finish
    pub fn roll_wal(&self) -> Result<()> {
        if self.core()?.rolling.roll_and_wait() {
            Ok(())
        } else {
            Err(PageKvError::Storage("rolling worker has stopped".to_string()))
        }
    }

    /// Stop the rolling worker and make everything durable
    pub fn close(self) -> Result<()> {
        match self.core.into_inner() {
            Some(core) => core.close(),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Outcome of the startup recovery
    pub fn recovery_summary(&self) -> Result<RecoverySummary> {
        Ok(self.core()?.recovery.clone())
    }

    /// Bytes logged since the last roll
    pub fn logged_bytes(&self) -> Result<u64> {
        Ok(self.core()?.rolling.logged_bytes())
    }

    /// Rolls completed since initialization
    pub fn roll_count(&self) -> Result<u64> {
        Ok(self.core()?.rolling.roll_count())
    }

    /// WAL segments on disk, active one included
    pub fn wal_segment_count(&self) -> Result<usize> {
        Ok(self.core()?.wal.list_segments()?.len())
    }

    /// Payload bytes per page
    pub fn page_size(&self) -> Result<usize> {
        Ok(self.core()?.store().page_size())
    }

    /// First never-used page id
    pub fn next_page_id(&self) -> Result<PageId> {
        Ok(self.core()?.records.allocator().next_page_id())
    }

    /// Freed page ids waiting for reuse
    pub fn recycled_page_count(&self) -> Result<usize> {
        Ok(self.core()?.records.allocator().recycled_count())
    }

    fn core(&self) -> Result<&Core<C>> {
        self.core.get().ok_or(PageKvError::Uninitialized)
    }
}

impl Engine<BytesCodec> {
    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory and raw byte
    /// values.
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config {
            data_dir: path.to_path_buf(),
            ..Config::default()
        };
        Self::open(config, BytesCodec)
    }
}

/// Everything that exists once the engine is initialized
struct Core<C: ValueCodec> {
    key_type: KeyType,
    codec: Arc<C>,
    records: RecordCodec,
    wal: Arc<WriteAheadLog>,
    index: Index,
    read_cache: ValueCache<C::Value>,
    write_cache: ValueCache<C::Value>,
    key_locks: KeyLocks,
    rolling: Arc<RollControl>,
    worker: Mutex<Option<RollingWorker>>,
    recovery: RecoverySummary,

    /// Dropped last
    _dir_lock: DirLock,
}

impl<C: ValueCodec> Core<C> {
    fn open(config: &Config, codec: Arc<C>) -> Result<Self> {
        // Step 1: Create data directory and take the process lock
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir_lock = DirLock::acquire(&config.lock_path())?;

        // Step 2: Map the page file
        let geometry = PageGeometry::new(config.page_size, config.region_shift)?;
        let store = Arc::new(PageStore::open(&config.data_path(), geometry)?);

        // Step 3: Restore records from the page store
        let threads = config.effective_recovery_threads();
        let index = Index::new();
        let mut recovery = RecoverySummary::default();
        let free = {
            let scan_codec = RecordCodec::new(
                Arc::clone(&store),
                PageAllocator::new(0),
                PageBufferPool::new(threads, store.page_size()),
            );
            let scan = recovery::scan_pages(&scan_codec, config.key_type, threads)?;
            tracing::debug!(found = scan.restored_count(), "Page scan finished");
            scan.install(&index, &store, &mut recovery)?
        };
        let allocator = PageAllocator::new(free.next_free);
        allocator.return_ids(&free.recycled);
        let buffers = PageBufferPool::new(config.page_buffer_pool_size, store.page_size());
        let records = RecordCodec::new(Arc::clone(&store), allocator, buffers);

        // Step 4: Open the WAL with a fresh active segment
        let wal = Arc::new(WriteAheadLog::open(
            &config.redo_log_path(),
            &config.redo_log_suffix,
            config.wal_sync_strategy,
        )?);

        let mut core = Self {
            key_type: config.key_type,
            codec,
            records,
            wal: Arc::clone(&wal),
            index,
            read_cache: ValueCache::new(config.read_cache_capacity),
            write_cache: ValueCache::new(config.write_cache_capacity),
            key_locks: KeyLocks::new(config.key_lock_stripes),
            rolling: Arc::new(RollControl::new(
                config.rolling_threshold_bytes,
                config.write_block_threshold_bytes,
            )),
            worker: Mutex::new(None),
            recovery: RecoverySummary::default(),
            _dir_lock: dir_lock,
        };

        // Step 5: Replay retired WAL segments through the write path
        let redo = core.replay_wal()?;
        recovery.wal_segments_replayed = redo.segments_replayed;
        recovery.wal_records_replayed = redo.records_replayed;
        recovery.wal_records_skipped = redo.records_skipped;
        recovery.wal_truncated = redo.was_truncated;
        core.recovery = recovery;

        // Step 6: Start rolling
        let worker = RollingWorker::spawn(Arc::clone(&core.rolling), wal, store)?;
        *core.worker.lock() = Some(worker);

        tracing::info!(
            data = %config.data_path().display(),
            keys = core.index.len(),
            records_restored = core.recovery.records_restored,
            wal_records_replayed = core.recovery.wal_records_replayed,
            "Engine initialized"
        );
        Ok(core)
    }

    fn store(&self) -> &PageStore {
        self.records.store()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn put(&self, key: Key, value: C::Value) -> Result<()> {
        let key_bytes = key.encode_checked(self.key_type)?;
        let _key_guard = self.key_locks.lock(&key_bytes);

        // Step 1: Skip values identical to the cached one
        if let Some(cached) = self.write_cache.get(&key) {
            if self.codec.value_equals(&value, &cached) {
                return Ok(());
            }
        }
        let read_cached = self.read_cache.get(&key);
        if let Some(cached) = &read_cached {
            if self.codec.value_equals(&value, cached) {
                return Ok(());
            }
        }

        let value_bytes = self.codec.encode(&value)?;
        self.records.check_fits(key_bytes.len(), value_bytes.len())?;

        // Step 2: Publish to the caches
        if read_cached.is_some() {
            self.read_cache.put(key.clone(), value.clone());
        }
        self.write_cache.put(key.clone(), value);

        // Step 3: Log, write pages, swap the index entry
        if let Err(e) = self.put_bytes(&key, &key_bytes, &value_bytes) {
            self.write_cache.invalidate(&key);
            self.read_cache.invalidate(&key);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, key: Key) -> Result<Option<C::Value>> {
        let key_bytes = key.encode_checked(self.key_type)?;
        if !self.index.contains_key(&key) {
            return Ok(None);
        }
        if let Some(value) = self.read_cache.get(&key) {
            return Ok(Some(value));
        }
        if let Some(value) = self.write_cache.get(&key) {
            return Ok(Some(value));
        }

        let _key_guard = self.key_locks.lock(&key_bytes);

        // Re-check under the key lock
        let Some(record) = self.index.get(&key) else {
            return Ok(None);
        };
        if let Some(value) = self.read_cache.get(&key) {
            return Ok(Some(value));
        }
        if let Some(value) = self.write_cache.get(&key) {
            self.read_cache.put(key, value.clone());
            return Ok(Some(value));
        }

        let bytes = self.records.get_value(&record)?.ok_or_else(|| {
            PageKvError::PageFault(format!("pages of key {} are not valid", key))
        })?;
        let value = self.codec.decode(&bytes)?;
        self.read_cache.put(key, value.clone());
        Ok(Some(value))
    }

    fn remove(&self, key: Key) -> Result<()> {
        let key_bytes = key.encode_checked(self.key_type)?;
        let _key_guard = self.key_locks.lock(&key_bytes);
        self.remove_bytes(&key, &key_bytes)
    }

    /// Log an UPDATE and install a fresh chain; caller holds the key lock
    fn put_bytes(&self, key: &Key, key_bytes: &[u8], value_bytes: &[u8]) -> Result<()> {
        let logged = {
            let _gate = self.rolling.enter();

            let header = LogOp::Update.header(key_bytes.len())?;
            let appended = self.wal.append(&[&header[..], key_bytes, value_bytes])?;
            let logged = self.rolling.add_logged(appended);

            self.install_chain(key, key_bytes, value_bytes)?;
            logged
        };
        self.rolling.throttle(logged);
        Ok(())
    }

    /// Log a DEL and free the chain; caller holds the key lock
    ///
    /// The index entry stays in place until the DEL is in the log.
    fn remove_bytes(&self, key: &Key, key_bytes: &[u8]) -> Result<()> {
        let logged = {
            let _gate = self.rolling.enter();

            if !self.index.contains_key(key) {
                return Ok(());
            }

            let header = LogOp::Delete.header(key_bytes.len())?;
            let appended = self.wal.append(&[&header[..], key_bytes])?;
            let logged = self.rolling.add_logged(appended);

            self.drop_chain(key)?;
            logged
        };
        self.rolling.throttle(logged);
        Ok(())
    }

    /// Write a chain for `key` and retire the one it replaces
    fn install_chain(&self, key: &Key, key_bytes: &[u8], value_bytes: &[u8]) -> Result<()> {
        let record = Arc::new(self.records.build_record(key_bytes, value_bytes)?);
        if let Some(old) = self.index.insert(key.clone(), Arc::clone(&record)) {
            let _update = old.lock(LockOp::Update);
            let old_ids = old.set_page_ids(record.page_ids());
            self.records.release_pages(&old_ids)?;
        }
        Ok(())
    }

    /// Unlink `key` and free its chain
    fn drop_chain(&self, key: &Key) -> Result<()> {
        let Some(old) = self.index.remove(key) else {
            return Ok(());
        };
        self.read_cache.invalidate(key);
        self.write_cache.invalidate(key);

        let _delete = old.lock(LockOp::Delete);
        let old_ids = old.remove_page_ids();
        self.records.release_pages(&old_ids)
    }

    // =========================================================================
    // Recovery and shutdown
    // =========================================================================

    /// Apply retired WAL segments straight to the page store
    ///
    /// Replayed records are not logged again. The segments are deleted only
    /// after every one of them is applied and the page store is flushed, so
    /// an interrupted replay starts over from the same segments in the same
    /// order.
    fn replay_wal(&self) -> Result<RedoSummary> {
        let replayed = self.wal.redo(|payload| match LogRecord::decode(payload)? {
            LogRecord::Update { key, value } => {
                let decoded = Key::decode(self.key_type, &key)?;
                let _key_guard = self.key_locks.lock(&key);
                self.install_chain(&decoded, &key, &value)
            }
            LogRecord::Delete { key } => {
                let decoded = Key::decode(self.key_type, &key)?;
                let _key_guard = self.key_locks.lock(&key);
                self.drop_chain(&decoded)
            }
        })?;

        if replayed.summary().segments_replayed > 0 {
            self.store().flush()?;
        }
        replayed.discard()
    }

    fn close(self) -> Result<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        self.wal.sync()?;
        self.store().flush()?;
        tracing::info!(keys = self.index.len(), "Engine closed");
        Ok(())
    }
}
