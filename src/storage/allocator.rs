//! Page Id Allocator
//!
//! Monotonic counter plus a lock-free recycle queue of freed ids.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam::queue::SegQueue;

use crate::error::{PageKvError, Result};

use super::{PageId, MAX_PAGE_ID};

/// Issues page ids, preferring recycled ones
///
/// A caller must only return an id after the page's INVALID state is
/// visible, so the next borrower never races a reader of the old content.
pub struct PageAllocator {
    /// Next never-used page id
    next: AtomicU32,

    /// Freed ids awaiting reuse
    recycled: SegQueue<PageId>,
}

impl PageAllocator {
    /// Create an allocator whose fresh ids start at `first_free`
    pub fn new(first_free: PageId) -> Self {
        Self {
            next: AtomicU32::new(first_free),
            recycled: SegQueue::new(),
        }
    }

    /// Borrow `count` ids, sorted ascending
    pub fn borrow_ids(&self, count: usize) -> Result<Vec<PageId>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = match self.recycled.pop() {
                Some(id) => id,
                None => match self.fresh_id() {
                    Some(id) => id,
                    None => {
                        self.return_ids(&ids);
                        return Err(PageKvError::Storage("page id space exhausted".into()));
                    }
                },
            };
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Give ids back for reuse
    pub fn return_ids(&self, ids: &[PageId]) {
        for &id in ids {
            self.recycled.push(id);
        }
    }

    pub fn return_id(&self, id: PageId) {
        self.recycled.push(id);
    }

    /// Next id the counter would hand out
    pub fn next_page_id(&self) -> PageId {
        self.next.load(Ordering::SeqCst)
    }

    /// Ids waiting in the recycle queue
    pub fn recycled_count(&self) -> usize {
        self.recycled.len()
    }

    fn fresh_id(&self) -> Option<PageId> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next <= MAX_PAGE_ID).then_some(next + 1)
            })
            .ok()
    }
}
