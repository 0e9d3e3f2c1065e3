//! Startup recovery
//!
//! ## Recovery Process
//! 1. Scan every mapped page slot in parallel; worker `i` of `N` takes the
//!    slots whose id is congruent to `i` mod `N`
//! 2. Every VALID first page heading a complete chain becomes a record
//! 3. Install records into the index; on a duplicate key the lower first
//!    page id wins and the other chain is invalidated
//! 4. Invalidate VALID pages no live record references
//! 5. Hand unreferenced ids below the highest referenced one back to the
//!    allocator, which resumes after that highest id
//!
//! WAL redo runs afterwards and applies its records without logging them again.

use std::sync::Arc;
use std::thread;

use crate::error::{PageKvError, Result};
use crate::index::Index;
use crate::key::{Key, KeyType};
use crate::record::{Record, RecordCodec};
use crate::storage::{PageId, PageState, PageStore, MAX_PAGE_ID};

use super::bitset::AtomicBitSet;

/// What the last startup recovery did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Page slots inspected by the scan
    pub pages_scanned: u64,

    /// Records rebuilt from the page store
    pub records_restored: u64,

    /// Chains dropped because another chain held the same key
    pub duplicate_keys: u64,

    /// VALID pages that belonged to no live record
    pub orphan_pages_invalidated: u64,

    /// Free ids below the high-water mark handed to the allocator
    pub pages_reclaimed: u64,

    /// WAL segments replayed and deleted
    pub wal_segments_replayed: u64,

    /// WAL records applied
    pub wal_records_replayed: u64,

    /// WAL records that could not be applied
    pub wal_records_skipped: u64,

    /// Whether a torn trailing WAL record was discarded
    pub wal_truncated: bool,
}

/// Allocator seed produced by [`PageScan::install`]
pub(crate) struct FreeSpace {
    /// First never-used page id
    pub(crate) next_free: PageId,

    /// Reusable ids below `next_free`
    pub(crate) recycled: Vec<PageId>,
}

/// Raw output of the parallel page scan
pub(crate) struct PageScan {
    restored: Vec<(Key, Record)>,
    unclaimed_valid: Vec<PageId>,
    referenced: AtomicBitSet,
    pages_scanned: u64,
}

#[derive(Default)]
struct StrideOutput {
    restored: Vec<(Key, Record)>,
    unclaimed_valid: Vec<PageId>,
    pages_scanned: u64,
}

/// Restore every record reachable from the page store
pub(crate) fn scan_pages(codec: &RecordCodec, key_type: KeyType, threads: usize) -> Result<PageScan> {
    let capacity = codec.store().page_capacity().min(MAX_PAGE_ID as u64 + 1);
    let threads = threads.max(1) as u64;
    let referenced = AtomicBitSet::with_capacity(capacity);

    tracing::info!(capacity, threads, "Scanning page store");

    let outputs = thread::scope(|scope| -> Result<Vec<StrideOutput>> {
        let mut handles = Vec::with_capacity(threads as usize);
        for worker in 0..threads {
            let referenced = &referenced;
            let handle = thread::Builder::new()
                .name(format!("pagekv-recovery-{}", worker))
                .spawn_scoped(scope, move || {
                    scan_stride(codec, key_type, referenced, worker, threads, capacity)
                })?;
            handles.push(handle);
        }

        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(output) => outputs.push(output?),
                Err(_) => {
                    return Err(PageKvError::Storage("recovery worker panicked".to_string()))
                }
            }
        }
        Ok(outputs)
    })?;

    let mut scan = PageScan {
        restored: Vec::new(),
        unclaimed_valid: Vec::new(),
        referenced,
        pages_scanned: 0,
    };
    for output in outputs {
        scan.restored.extend(output.restored);
        scan.unclaimed_valid.extend(output.unclaimed_valid);
        scan.pages_scanned += output.pages_scanned;
    }
    Ok(scan)
}

fn scan_stride(
    codec: &RecordCodec,
    key_type: KeyType,
    referenced: &AtomicBitSet,
    first: u64,
    step: u64,
    capacity: u64,
) -> Result<StrideOutput> {
    let store = codec.store();
    let mut output = StrideOutput::default();

    let mut next = first;
    while next < capacity {
        let page_id = next as PageId;
        next += step;
        output.pages_scanned += 1;

        match store.page_state(page_id) {
            Ok(Some(PageState::Valid)) => {}
            Ok(_) => continue,
            Err(e) if e.is_page_fault() => {
                tracing::warn!(page_id, error = %e, "Recovery worker stopped at page fault");
                break;
            }
            Err(e) => return Err(e),
        }

        let restored = match codec.restore_record(page_id) {
            Ok(restored) => restored,
            Err(e) if e.is_page_fault() => {
                tracing::warn!(page_id, error = %e, "Recovery worker stopped at page fault");
                break;
            }
            Err(e) => return Err(e),
        };

        let Some((key_bytes, record)) = restored else {
            // Continuation page or broken chain; sorted out after the scan
            output.unclaimed_valid.push(page_id);
            continue;
        };
        match Key::decode(key_type, &key_bytes) {
            Ok(key) => {
                for id in record.page_ids() {
                    referenced.set(id as u64);
                }
                output.restored.push((key, record));
            }
            Err(e) => {
                tracing::warn!(page_id, error = %e, "Dropping record with undecodable key");
                output.unclaimed_valid.push(page_id);
            }
        }
    }

    Ok(output)
}

impl PageScan {
    /// Number of records found, duplicates included
    pub(crate) fn restored_count(&self) -> usize {
        self.restored.len()
    }

    /// Move restored records into `index` and clean up the page store
    pub(crate) fn install(
        self,
        index: &Index,
        store: &PageStore,
        summary: &mut RecoverySummary,
    ) -> Result<FreeSpace> {
        let PageScan {
            mut restored,
            unclaimed_valid,
            referenced,
            pages_scanned,
        } = self;
        summary.pages_scanned = pages_scanned;

        restored.sort_by_key(|(_, record)| record.first_page_id());
        let mut losers: Vec<Arc<Record>> = Vec::new();
        for (key, record) in restored {
            let record = Arc::new(record);
            let kept = index.insert_if_absent(key.clone(), Arc::clone(&record));
            if Arc::ptr_eq(&kept, &record) {
                summary.records_restored += 1;
            } else {
                tracing::warn!(
                    key = %key,
                    kept = ?kept.first_page_id(),
                    dropped = ?record.first_page_id(),
                    "Duplicate key in page store"
                );
                losers.push(record);
            }
        }

        let mut max_page_id: Option<PageId> = None;
        if !losers.is_empty() {
            referenced.clear();
        }
        for record in index.records() {
            for id in record.page_ids() {
                if !losers.is_empty() {
                    referenced.set(id as u64);
                }
                max_page_id = max_page_id.max(Some(id));
            }
        }
        summary.duplicate_keys = losers.len() as u64;

        let mut orphans: Vec<PageId> = losers
            .iter()
            .flat_map(|record| record.page_ids())
            .chain(unclaimed_valid)
            .filter(|&id| !referenced.get(id as u64))
            .collect();
        orphans.sort_unstable();
        orphans.dedup();
        for &id in &orphans {
            store.mark_invalid(id)?;
        }
        summary.orphan_pages_invalidated = orphans.len() as u64;

        let free = match max_page_id {
            Some(max) => FreeSpace {
                next_free: max + 1,
                recycled: referenced
                    .unset_below(max as u64)
                    .into_iter()
                    .map(|id| id as PageId)
                    .collect(),
            },
            None => FreeSpace {
                next_free: 0,
                recycled: Vec::new(),
            },
        };
        summary.pages_reclaimed = free.recycled.len() as u64;

        tracing::info!(
            records = summary.records_restored,
            duplicates = summary.duplicate_keys,
            orphans = summary.orphan_pages_invalidated,
            reclaimed = summary.pages_reclaimed,
            next_free = free.next_free,
            "Restored page store"
        );
        Ok(free)
    }
}
