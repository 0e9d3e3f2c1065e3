//! WAL Writer
//!
//! Appends records to the active segment and rolls it.
//!
//! ## Concurrency:
//! - `active`: RwLock acting as the roll lock. Appenders take it shared,
//!   `roll` takes it exclusive only for the swap.
//! - each segment's file sits behind its own Mutex, so one record is always
//!   written as a single uninterrupted `write_all`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, RwLock};

use crate::config::WalSyncStrategy;
use crate::error::{PageKvError, Result};

use super::LENGTH_PREFIX_SIZE;

/// One segment file
pub(super) struct Segment {
    /// Numeric file stem (epoch millis at creation)
    pub(super) id: u64,
    pub(super) path: PathBuf,
    file: Mutex<File>,
}

impl Segment {
    fn create(dir: &Path, id: u64, suffix: &str) -> Result<Self> {
        let path = dir.join(format!("{}.{}", id, suffix));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
        })
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

/// A segment taken out of service by [`WriteAheadLog::roll`]
///
/// Its records stay on disk until [`discard`](Self::discard) is called, so
/// the caller can first make the page store durable.
pub struct RetiredSegment {
    segment: Arc<Segment>,
}

impl RetiredSegment {
    pub fn path(&self) -> &Path {
        &self.segment.path
    }

    /// Delete the segment file
    pub fn discard(self) -> Result<()> {
        match fs::remove_file(&self.segment.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Segmented append-only redo log
pub struct WriteAheadLog {
    /// Directory holding the segments
    dir: PathBuf,

    /// Segment file extension
    suffix: String,

    sync_strategy: WalSyncStrategy,

    /// Segment receiving appends
    active: RwLock<Arc<Segment>>,

    /// Records appended since open (for `EveryNEntries`)
    appended: AtomicU64,
}

impl WriteAheadLog {
    /// Open the log directory and start a fresh active segment
    ///
    /// Existing segments are left untouched for [`redo`](Self::redo).
    pub fn open(dir: &Path, suffix: &str, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(PageKvError::Config(format!(
                "redo log path {} should be a directory",
                dir.display()
            )));
        }

        let newest = Self::list_segments_in(dir, suffix)?
            .last()
            .map(|(id, _)| *id);
        let active = Self::create_segment(dir, suffix, newest)?;
        tracing::info!(segment = %active.path.display(), "Opened WAL");

        Ok(Self {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
            sync_strategy,
            active: RwLock::new(Arc::new(active)),
            appended: AtomicU64::new(0),
        })
    }

    /// Append one record made of `parts`, applying the configured sync strategy
    ///
    /// Returns bytes written including the length prefix.
    pub fn append(&self, parts: &[&[u8]]) -> Result<u64> {
        let count = self.appended.fetch_add(1, Ordering::Relaxed) + 1;
        let flush_now = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count: n } => count % n as u64 == 0,
            WalSyncStrategy::OnRoll => false,
        };
        self.log(flush_now, parts)
    }

    /// Append one record made of `parts`
    ///
    /// The parts are concatenated behind a big-endian length prefix and
    /// written as one unit. With `flush_now`, the segment is synced before
    /// returning. Returns bytes written including the prefix.
    pub fn log(&self, flush_now: bool, parts: &[&[u8]]) -> Result<u64> {
        if parts.is_empty() {
            return Err(PageKvError::InvalidArgument("log parts should not be empty".into()));
        }
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let len = u32::try_from(total).map_err(|_| {
            PageKvError::InvalidArgument(format!("log record of {} bytes is too large", total))
        })?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + total);
        buf.put_u32(len);
        for part in parts {
            buf.extend_from_slice(part);
        }

        let active = self.active.read();
        {
            let mut file = active.file.lock();
            file.write_all(&buf)?;
            if flush_now {
                file.sync_data()?;
            }
        }
        Ok(buf.len() as u64)
    }

    /// Swap in a fresh, empty active segment
    ///
    /// The old segment is synced and returned; appenders are excluded only
    /// for the swap itself.
    pub fn roll(&self) -> Result<RetiredSegment> {
        let current_id = self.active.read().id;
        let fresh = Arc::new(Self::create_segment(&self.dir, &self.suffix, Some(current_id))?);

        let old = {
            let mut active = self.active.write();
            std::mem::replace(&mut *active, fresh)
        };
        old.sync()?;

        tracing::info!(
            retired = %old.path.display(),
            active = %self.active_path().display(),
            "Rolled WAL segment"
        );
        Ok(RetiredSegment { segment: old })
    }

    /// Force the active segment to stable storage
    pub fn sync(&self) -> Result<()> {
        let active = Arc::clone(&self.active.read());
        active.sync()
    }

    /// Path of the segment currently receiving appends
    pub fn active_path(&self) -> PathBuf {
        self.active.read().path.clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Every segment in the directory, oldest first
    pub fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        Self::list_segments_in(&self.dir, &self.suffix)
    }

    pub(super) fn active_id(&self) -> u64 {
        self.active.read().id
    }

    /// Swap the active file handle for a read-only one so appends fail
    #[cfg(test)]
    pub(crate) fn reopen_active_read_only(&self) -> Result<()> {
        let active = self.active.read();
        *active.file.lock() = File::open(&active.path)?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Create a segment named after the current time, newer than `after`
    fn create_segment(dir: &Path, suffix: &str, after: Option<u64>) -> Result<Segment> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut id = match after {
            Some(prev) => now.max(prev + 1),
            None => now,
        };
        loop {
            match Segment::create(dir, id, suffix) {
                Ok(segment) => return Ok(segment),
                Err(PageKvError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    id += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Segments sorted by numeric file stem
    fn list_segments_in(dir: &Path, suffix: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(id) = Self::parse_segment_id(&path, suffix) {
                segments.push((id, path));
            }
        }
        segments.sort_by_key(|(id, _)| *id);
        Ok(segments)
    }

    /// "1715312400123.redo" → Some(1715312400123)
    fn parse_segment_id(path: &Path, suffix: &str) -> Option<u64> {
        if path.extension()?.to_str()? != suffix {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }
}
