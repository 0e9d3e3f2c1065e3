//! Record Codec
//!
//! Writes key/value pairs into page chains and reads them back.

use std::sync::Arc;

use crate::error::{PageKvError, Result};
use crate::key::MAX_KEY_LENGTH;
use crate::storage::{PageAllocator, PageBuffer, PageBufferPool, PageId, PageStore};

use super::layout::{
    copy_stream_out, data_index, page_count, read_link, write_link, FirstPageHeader,
    MAX_PAGE_COUNT, MAX_VALUE_LENGTH,
};
use super::{LockOp, Record};

/// Encodes records into the page store and decodes them back
pub struct RecordCodec {
    store: Arc<PageStore>,
    allocator: PageAllocator,
    buffers: PageBufferPool,
}

impl RecordCodec {
    pub fn new(store: Arc<PageStore>, allocator: PageAllocator, buffers: PageBufferPool) -> Self {
        Self {
            store,
            allocator,
            buffers,
        }
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn allocator(&self) -> &PageAllocator {
        &self.allocator
    }

    pub fn buffers(&self) -> &PageBufferPool {
        &self.buffers
    }

    /// Write `key`/`value` into a fresh page chain
    ///
    /// On failure every borrowed page id goes back to the allocator and any
    /// page already written is left INVALID.
    pub fn build_record(&self, key: &[u8], value: &[u8]) -> Result<Record> {
        let count = self.check_fits(key.len(), value.len())?;
        let page_ids = self.allocator.borrow_ids(count)?;
        if let Err(e) = self.write_chain(&page_ids, key, value) {
            for &page_id in &page_ids {
                if let Err(invalidate_err) = self.store.mark_invalid(page_id) {
                    tracing::warn!(page_id, error = %invalidate_err, "Failed to invalidate page of aborted record");
                }
            }
            self.allocator.return_ids(&page_ids);
            return Err(e);
        }

        Ok(Record::new(page_ids))
    }

    /// Validate lengths and return the number of pages the pair needs
    pub fn check_fits(&self, key_len: usize, value_len: usize) -> Result<usize> {
        if key_len > MAX_KEY_LENGTH {
            return Err(PageKvError::InvalidArgument(format!(
                "key length should <= {}",
                MAX_KEY_LENGTH
            )));
        }
        if value_len > MAX_VALUE_LENGTH {
            return Err(PageKvError::InvalidArgument(format!(
                "value length should <= {}",
                MAX_VALUE_LENGTH
            )));
        }
        let count = page_count(key_len, value_len, self.store.page_size());
        if count > MAX_PAGE_COUNT {
            return Err(PageKvError::InvalidArgument(
                "key and value is too large".to_string(),
            ));
        }
        Ok(count)
    }

    /// Rebuild the record whose first page is `start`
    ///
    /// Returns `Ok(None)` when `start` is not the VALID first page of a
    /// complete chain: a continuation page, freed space, a never-written
    /// slot, or a chain broken by a crash. Only I/O failures are errors.
    pub fn restore_record(&self, start: PageId) -> Result<Option<(Vec<u8>, Record)>> {
        let mut page = self.buffers.borrow();
        if !self.read_valid(start, &mut page)? {
            return Ok(None);
        }

        let (is_first, _) = read_link(&page);
        if !is_first {
            return Ok(None);
        }
        let header = FirstPageHeader::read(&page);
        let expected_pages = header.page_count as usize;
        let key_len = header.key_len as usize;
        if expected_pages == 0 || header.value_len < 0 {
            return Ok(None);
        }
        let page_size = self.store.page_size();
        if page_count(key_len, header.value_len as usize, page_size) != expected_pages {
            return Ok(None);
        }

        let mut page_ids = Vec::with_capacity(expected_pages);
        let mut key = Vec::with_capacity(key_len);
        let mut current = start;
        loop {
            let page_index = page_ids.len();
            page_ids.push(current);

            if key.len() < key_len {
                let from = data_index(page_index);
                let n = (key_len - key.len()).min(page_size - from);
                key.extend_from_slice(&page[from..from + n]);
            }

            let (_, next) = read_link(&page);
            if next == current {
                break;
            }
            // Chains are allocated ascending, so a step backwards means garbage
            if next < current || page_ids.len() >= expected_pages {
                return Ok(None);
            }
            if !self.read_valid(next, &mut page)? || read_link(&page).0 {
                return Ok(None);
            }
            current = next;
        }

        if page_ids.len() != expected_pages || key.len() != key_len {
            return Ok(None);
        }
        Ok(Some((key, Record::new(page_ids))))
    }

    /// Read a record's value
    ///
    /// The record's GET lock is held only while pages are copied out;
    /// reassembly happens after release. `Ok(None)` means some page of the
    /// chain is currently not VALID.
    pub fn get_value(&self, record: &Record) -> Result<Option<Vec<u8>>> {
        let pages = {
            let _guard = record.lock(LockOp::Get);
            let page_ids = record.page_ids();
            if page_ids.is_empty() {
                return Ok(None);
            }
            let mut pages: Vec<PageBuffer<'_>> = Vec::with_capacity(page_ids.len());
            for page_id in page_ids {
                let mut page = self.buffers.borrow();
                if !self.read_valid(page_id, &mut page)? {
                    return Ok(None);
                }
                pages.push(page);
            }
            pages
        };

        let header = FirstPageHeader::read(&pages[0]);
        if header.value_len < 0 {
            return Ok(None);
        }
        let key_len = header.key_len as usize;
        let value_len = header.value_len as usize;
        let page_size = self.store.page_size();

        // Skip the key bytes, collect the value bytes
        let mut value = Vec::with_capacity(value_len);
        let mut key_left = key_len;
        for (index, page) in pages.iter().enumerate() {
            let mut from = data_index(index);
            let skip = key_left.min(page_size - from);
            key_left -= skip;
            from += skip;
            let n = (value_len - value.len()).min(page_size - from);
            value.extend_from_slice(&page[from..from + n]);
        }

        if value.len() != value_len {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Mark every page of a detached chain INVALID and recycle the ids
    pub fn release_pages(&self, page_ids: &[PageId]) -> Result<()> {
        for &page_id in page_ids {
            self.store.mark_invalid(page_id)?;
        }
        self.allocator.return_ids(page_ids);
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn write_chain(&self, page_ids: &[PageId], key: &[u8], value: &[u8]) -> Result<()> {
        let page_size = self.store.page_size();
        let mut page = self.buffers.borrow();
        let mut pos = 0;

        for (index, &page_id) in page_ids.iter().enumerate() {
            page.fill(0);
            let next = page_ids.get(index + 1).copied().unwrap_or(page_id);
            write_link(&mut page, index == 0, next);
            if index == 0 {
                FirstPageHeader {
                    page_count: page_ids.len() as u16,
                    key_len: key.len() as u8,
                    value_len: value.len() as i32,
                }
                .write(&mut page);
            }
            let from = data_index(index);
            pos += copy_stream_out(key, value, pos, &mut page[from..page_size]);
            self.store.write_page(page_id, &page[..page_size], true)?;
        }
        Ok(())
    }

    /// Read a page, folding "missing" into "not valid"
    fn read_valid(&self, page_id: PageId, dst: &mut [u8]) -> Result<bool> {
        match self.store.read_page(page_id, dst) {
            Ok(valid) => Ok(valid),
            Err(PageKvError::PageFault(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
