//! WAL Recovery
//!
//! Replays retired segments in creation order. Deleting them is a separate
//! step so the caller can make the replayed state durable first.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{PageKvError, Result};

use super::{SegmentReader, WriteAheadLog};

/// Result of a redo pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RedoSummary {
    /// Segments replayed
    pub segments_replayed: u64,

    /// Records handed to the reader
    pub records_replayed: u64,

    /// Records the reader rejected (logged and skipped)
    pub records_skipped: u64,

    /// Whether any segment ended in a torn record
    pub was_truncated: bool,
}

/// Segments replayed by [`WriteAheadLog::redo`], still on disk
#[derive(Debug)]
pub struct ReplayedSegments {
    summary: RedoSummary,
    paths: Vec<PathBuf>,
}

impl ReplayedSegments {
    pub fn summary(&self) -> &RedoSummary {
        &self.summary
    }

    /// Replayed segment files, oldest first
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete the replayed segments, oldest first
    pub fn discard(self) -> Result<RedoSummary> {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.summary)
    }
}

impl WriteAheadLog {
    /// Replay every segment except the active one, oldest first
    ///
    /// `reader` sees each record payload in log order. A reader error other
    /// than I/O is logged and the record skipped; an I/O error aborts the
    /// redo. Nothing is deleted here: the segments stay on disk until
    /// [`ReplayedSegments::discard`], so an interrupted redo can run again
    /// from the first segment.
    pub fn redo<F>(&self, mut reader: F) -> Result<ReplayedSegments>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let active_id = self.active_id();
        let segments: Vec<_> = self
            .list_segments()?
            .into_iter()
            .filter(|(id, _)| *id != active_id)
            .collect();

        let mut replayed = ReplayedSegments {
            summary: RedoSummary::default(),
            paths: Vec::with_capacity(segments.len()),
        };
        for (id, path) in segments {
            let summary = &mut replayed.summary;
            let mut segment = SegmentReader::open(&path)?;
            let mut records = 0u64;
            while let Some(payload) = segment.next_record()? {
                records += 1;
                match reader(&payload) {
                    Ok(()) => summary.records_replayed += 1,
                    Err(e @ PageKvError::Io(_)) => return Err(e),
                    Err(e) => {
                        summary.records_skipped += 1;
                        tracing::error!(segment = id, record = records, error = %e, "Skipping WAL record");
                    }
                }
            }
            summary.was_truncated |= segment.was_truncated();
            summary.segments_replayed += 1;
            replayed.paths.push(path);
            tracing::debug!(segment = id, records, "Replayed WAL segment");
        }

        Ok(replayed)
    }
}
