//! Page latches
//!
//! Mutual exclusion on a single page id. Holding the latch for a page makes
//! its state byte and payload one unit: no reader sees the state of one
//! write paired with the payload of another.
//!
//! Latches are striped by page id. Two pages may share a stripe, so a
//! caller never holds more than one latch at a time.

use parking_lot::{Mutex, MutexGuard};

use super::PageId;

/// Default number of latch stripes
pub(crate) const DEFAULT_LATCH_STRIPES: usize = 1024;

/// Striped page latches
pub(crate) struct PageLatches {
    stripes: Box<[Mutex<()>]>,
}

/// RAII guard; releases the stripe on drop
pub(crate) type PageLatch<'a> = MutexGuard<'a, ()>;

impl PageLatches {
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    /// Block until `page_id` is free, then latch it
    pub(crate) fn lock(&self, page_id: PageId) -> PageLatch<'_> {
        self.stripes[self.stripe_of(page_id)].lock()
    }

    fn stripe_of(&self, page_id: PageId) -> usize {
        page_id as usize % self.stripes.len()
    }
}

impl Default for PageLatches {
    fn default() -> Self {
        Self::new(DEFAULT_LATCH_STRIPES)
    }
}
