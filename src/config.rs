//! Configuration for PageKV
//!
//! Centralized configuration with sensible defaults. Validation happens once,
//! in [`ConfigBuilder::build`]; the engine assumes a built config is sane.

use std::path::{Path, PathBuf};

use crate::error::{PageKvError, Result};
use crate::key::KeyType;
use crate::storage::PageGeometry;

/// Main configuration for a PageKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure (defaults):
    ///   {data_dir}/
    ///     ├── pagekv.data      (memory-mapped page file)
    ///     ├── pagekv.lock      (process lock)
    ///     └── redo/            (WAL segments: {epoch_millis}.redo)
    pub data_dir: PathBuf,

    /// Name of the page file inside `data_dir`
    pub data_file: String,

    /// Nominal page payload size in bytes. Rounded so that payload + 1
    /// metadata byte is a power of two.
    pub page_size: usize,

    /// log2 of the size of one memory-mapped region of the page file
    pub region_shift: u32,

    /// Scratch page buffers kept for reuse (0 disables pooling)
    pub page_buffer_pool_size: usize,

    // -------------------------------------------------------------------------
    // Key / Cache Configuration
    // -------------------------------------------------------------------------
    /// Type every key of this database must have
    pub key_type: KeyType,

    /// Max entries in the read cache
    pub read_cache_capacity: usize,

    /// Max entries in the write cache
    pub write_cache_capacity: usize,

    /// Number of mutexes in the per-key lock registry
    pub key_lock_stripes: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Directory holding WAL segments (defaults to `{data_dir}/redo`)
    pub redo_log_dir: Option<PathBuf>,

    /// File extension of WAL segments
    pub redo_log_suffix: String,

    /// Sync strategy: how often to fsync the active WAL segment
    pub wal_sync_strategy: WalSyncStrategy,

    /// Logged bytes after which the rolling worker is woken
    pub rolling_threshold_bytes: u64,

    /// Logged bytes after which writers block until a roll completes
    pub write_block_threshold_bytes: u64,

    // -------------------------------------------------------------------------
    // Process Configuration
    // -------------------------------------------------------------------------
    /// Directory of the lock file (defaults to `data_dir`)
    pub lock_dir: Option<PathBuf>,

    /// Name of the lock file
    pub lock_file: String,

    /// Worker threads used by the startup page scan (0 = available parallelism)
    pub recovery_threads: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N appended records (balanced durability/performance)
    EveryNEntries { count: usize },

    /// Only fsync when a segment is rolled, flushed or closed
    OnRoll,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./pagekv_data"),
            data_file: "pagekv.data".to_string(),
            page_size: 256,
            region_shift: 30, // 1 GiB regions
            page_buffer_pool_size: 10_000,
            key_type: KeyType::String,
            read_cache_capacity: 1_000_000,
            write_cache_capacity: 1_000_000,
            key_lock_stripes: 1024,
            redo_log_dir: None,
            redo_log_suffix: "redo".to_string(),
            wal_sync_strategy: WalSyncStrategy::OnRoll,
            rolling_threshold_bytes: 100 * 1024 * 1024,      // 100 MB
            write_block_threshold_bytes: 1000 * 1024 * 1024, // 1000 MB
            lock_dir: None,
            lock_file: "pagekv.lock".to_string(),
            recovery_threads: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the page file
    pub fn data_path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }

    /// Directory holding WAL segments
    pub fn redo_log_path(&self) -> PathBuf {
        self.redo_log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("redo"))
    }

    /// Full path of the process lock file
    pub fn lock_path(&self) -> PathBuf {
        self.lock_dir
            .as_deref()
            .unwrap_or(self.data_dir.as_path())
            .join(&self.lock_file)
    }

    /// Number of recovery scan workers after resolving the 0 default
    pub fn effective_recovery_threads(&self) -> usize {
        if self.recovery_threads > 0 {
            return self.recovery_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// Check every option; [`ConfigBuilder::build`] and engine startup call this
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(PageKvError::Config(msg.to_string()))
        }

        if is_empty_path(&self.data_dir) {
            return invalid("data_dir is empty");
        }
        if self.data_file.is_empty() {
            return invalid("data_file is empty");
        }
        if self.page_size == 0 {
            return invalid("page_size should > 0");
        }
        if !(12..=40).contains(&self.region_shift) {
            return invalid("region_shift should be within [12, 40]");
        }
        if let Err(e) = PageGeometry::new(self.page_size, self.region_shift) {
            return Err(PageKvError::Config(format!("page_size {}: {}", self.page_size, e)));
        }
        if self.read_cache_capacity == 0 {
            return invalid("read_cache_capacity should > 0");
        }
        if self.write_cache_capacity == 0 {
            return invalid("write_cache_capacity should > 0");
        }
        if self.key_lock_stripes == 0 {
            return invalid("key_lock_stripes should > 0");
        }
        if self.redo_log_dir.as_deref().is_some_and(is_empty_path) {
            return invalid("redo_log_dir is empty");
        }
        if self.redo_log_suffix.is_empty() {
            return invalid("redo_log_suffix is empty");
        }
        if self.redo_log_suffix.contains(['.', '/', '\\']) {
            return invalid("redo_log_suffix should not contain '.' or path separators");
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return invalid("wal sync entry count should > 0");
        }
        if self.rolling_threshold_bytes == 0 {
            return invalid("rolling_threshold_bytes should > 0");
        }
        if self.write_block_threshold_bytes <= self.rolling_threshold_bytes {
            return invalid("write_block_threshold_bytes should > rolling_threshold_bytes");
        }
        if self.lock_file.is_empty() {
            return invalid("lock_file is empty");
        }
        Ok(())
    }
}

fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the page file name
    pub fn data_file(mut self, name: impl Into<String>) -> Self {
        self.config.data_file = name.into();
        self
    }

    /// Set the nominal page size (in bytes, excluding the metadata byte)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set log2 of the mapped region size
    pub fn region_shift(mut self, shift: u32) -> Self {
        self.config.region_shift = shift;
        self
    }

    /// Set the number of pooled page buffers
    pub fn page_buffer_pool_size(mut self, size: usize) -> Self {
        self.config.page_buffer_pool_size = size;
        self
    }

    /// Set the key type
    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.config.key_type = key_type;
        self
    }

    /// Set the read cache capacity (entries)
    pub fn read_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.read_cache_capacity = capacity;
        self
    }

    /// Set the write cache capacity (entries)
    pub fn write_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.write_cache_capacity = capacity;
        self
    }

    /// Set the number of per-key lock stripes
    pub fn key_lock_stripes(mut self, stripes: usize) -> Self {
        self.config.key_lock_stripes = stripes;
        self
    }

    /// Set the WAL segment directory
    pub fn redo_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.redo_log_dir = Some(path.into());
        self
    }

    /// Set the WAL segment file extension
    pub fn redo_log_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.redo_log_suffix = suffix.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Shorthand for `EveryWrite` (true) or `OnRoll` (false)
    pub fn log_with_flush(mut self, flush: bool) -> Self {
        self.config.wal_sync_strategy = if flush {
            WalSyncStrategy::EveryWrite
        } else {
            WalSyncStrategy::OnRoll
        };
        self
    }

    /// Set the rolling threshold (in bytes)
    pub fn rolling_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.rolling_threshold_bytes = bytes;
        self
    }

    /// Set the write-block threshold (in bytes)
    pub fn write_block_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.write_block_threshold_bytes = bytes;
        self
    }

    /// Set the lock file directory
    pub fn lock_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lock_dir = Some(path.into());
        self
    }

    /// Set the lock file name
    pub fn lock_file(mut self, name: impl Into<String>) -> Self {
        self.config.lock_file = name.into();
        self
    }

    /// Set the number of recovery scan workers
    pub fn recovery_threads(mut self, threads: usize) -> Self {
        self.config.recovery_threads = threads;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
