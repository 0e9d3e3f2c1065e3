//! Record Module
//!
//! A record is one key/value pair stored across a chain of pages.
//!
//! ## Responsibilities
//! - Encode a key/value pair into a page chain (and back)
//! - Rebuild a record from its first page during recovery
//! - Serialize GET against UPDATE/DELETE on one record
//!
//! ## Page Layout (big-endian)
//! ```text
//! First page
//! ┌─────────┬──────────────┬────────────┬───────────┬──────────────┬─────┬───────┐
//! │First (1b)│NextPage (31b)│PageCount(2)│KeyLen (1) │ValueLen (4)  │ Key │ Value │
//! └─────────┴──────────────┴────────────┴───────────┴──────────────┴─────┴───────┘
//!   byte 0 ──────────── 3    4 ─── 5       6          7 ──── 10      11 ..
//!
//! Continuation page
//! ┌─────────┬──────────────┬───────────────────────────────┐
//! │First (1b)│NextPage (31b)│ rest of key, then value       │
//! └─────────┴──────────────┴───────────────────────────────┘
//!
//! The last page of a chain points at itself.
//! ```

mod codec;
mod layout;
mod lock;

use parking_lot::{Condvar, Mutex};

use crate::storage::PageId;

pub use codec::RecordCodec;
pub use layout::{
    chain_capacity, page_count, FIRST_PAGE_DATA_INDEX, MAX_PAGE_COUNT, MAX_VALUE_LENGTH,
    OTHER_PAGE_DATA_INDEX,
};
pub use lock::{LockOp, LockState, RecordGuard};

/// Index value: the page chain of one key plus its concurrency flag
///
/// Flag word: low 30 bits count concurrent GET holders, bit 30 marks an
/// UPDATE in progress, bit 31 a DELETE.
pub struct Record {
    state: Mutex<RecordState>,
    changed: Condvar,
}

struct RecordState {
    /// Page ids in chain order (ascending)
    page_ids: Vec<PageId>,
    flag: u32,
}

impl Record {
    pub fn new(page_ids: Vec<PageId>) -> Self {
        Self {
            state: Mutex::new(RecordState { page_ids, flag: 0 }),
            changed: Condvar::new(),
        }
    }

    /// Snapshot of the chain's page ids
    pub fn page_ids(&self) -> Vec<PageId> {
        self.state.lock().page_ids.clone()
    }

    /// First page of the chain
    pub fn first_page_id(&self) -> Option<PageId> {
        self.state.lock().page_ids.first().copied()
    }

    /// Last (highest) page of the chain
    pub fn last_page_id(&self) -> Option<PageId> {
        self.state.lock().page_ids.last().copied()
    }

    /// Swap in a new chain, returning the old one; resets the flag to idle
    pub fn set_page_ids(&self, page_ids: Vec<PageId>) -> Vec<PageId> {
        let mut state = self.state.lock();
        let old = std::mem::replace(&mut state.page_ids, page_ids);
        state.flag = 0;
        self.changed.notify_all();
        old
    }

    /// Detach the chain, returning it; resets the flag to idle
    pub fn remove_page_ids(&self) -> Vec<PageId> {
        let mut state = self.state.lock();
        let old = std::mem::take(&mut state.page_ids);
        state.flag = 0;
        self.changed.notify_all();
        old
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Record")
            .field("page_ids", &state.page_ids)
            .field("flag", &format_args!("{:#010x}", state.flag))
            .finish()
    }
}
