//! Page Buffer Pool
//!
//! Bounded pool of page-sized scratch buffers, borrowed per call and returned
//! when the guard drops. A pool of size 0 allocates on every borrow.

use std::ops::{Deref, DerefMut};

use crossbeam::queue::ArrayQueue;

/// Pool of reusable page buffers
pub struct PageBufferPool {
    /// `None` when pooling is disabled
    buffers: Option<ArrayQueue<Vec<u8>>>,

    /// Length of every buffer handed out
    page_size: usize,
}

impl PageBufferPool {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            buffers: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            page_size,
        }
    }

    /// Borrow a zeroed buffer of `page_size` bytes
    pub fn borrow(&self) -> PageBuffer<'_> {
        let buf = match self.buffers.as_ref().and_then(|q| q.pop()) {
            Some(mut buf) => {
                buf.fill(0);
                buf
            }
            None => vec![0u8; self.page_size],
        };
        PageBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Buffers currently idle in the pool
    pub fn idle(&self) -> usize {
        self.buffers.as_ref().map_or(0, |q| q.len())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn give_back(&self, buf: Vec<u8>) {
        if let Some(queue) = &self.buffers {
            // A full pool simply drops the extra buffer
            let _ = queue.push(buf);
        }
    }
}

/// A borrowed page buffer
pub struct PageBuffer<'a> {
    pool: &'a PageBufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for PageBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PageBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PageBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}
