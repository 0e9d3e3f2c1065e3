//! Record page layout
//!
//! Header offsets and capacity arithmetic shared by build, restore and read.

use bytes::{Buf, BufMut};

use crate::storage::{PageId, MAX_PAGE_ID};

pub(crate) const LINK_INDEX: usize = 0;
pub(crate) const PAGE_COUNT_INDEX: usize = 4;
pub(crate) const KEY_LENGTH_INDEX: usize = 6;
pub(crate) const VALUE_LENGTH_INDEX: usize = 7;

/// Start of key/value bytes on the first page
pub const FIRST_PAGE_DATA_INDEX: usize = 11;

/// Start of key/value bytes on continuation pages
pub const OTHER_PAGE_DATA_INDEX: usize = 4;

/// Longest chain a record may occupy
pub const MAX_PAGE_COUNT: usize = u16::MAX as usize;

/// Longest value a record may hold
pub const MAX_VALUE_LENGTH: usize = i32::MAX as usize;

const IS_FIRST_PAGE_BIT: u32 = 0x8000_0000;

/// Pages needed for a key/value pair, packing greedily
///
/// With `page_size = 64`, a 3-byte key and a 200-byte value take 4 pages:
/// 53 + 60 + 60 + 60 bytes of capacity.
pub fn page_count(key_len: usize, value_len: usize, page_size: usize) -> usize {
    let total = FIRST_PAGE_DATA_INDEX + key_len + value_len;
    if total <= page_size {
        return 1;
    }
    let per_page = page_size - OTHER_PAGE_DATA_INDEX;
    1 + (total - page_size).div_ceil(per_page)
}

/// Key + value bytes a chain of `page_count` pages can hold
pub fn chain_capacity(page_count: usize, page_size: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    page_count * page_size - FIRST_PAGE_DATA_INDEX - OTHER_PAGE_DATA_INDEX * (page_count - 1)
}

/// Offset of the key/value area on the `index`-th page of a chain
pub(crate) fn data_index(page_index: usize) -> usize {
    if page_index == 0 {
        FIRST_PAGE_DATA_INDEX
    } else {
        OTHER_PAGE_DATA_INDEX
    }
}

/// Write the first-page flag and the next page id
pub(crate) fn write_link(page: &mut [u8], is_first: bool, next_page_id: PageId) {
    let mut word = next_page_id & MAX_PAGE_ID;
    if is_first {
        word |= IS_FIRST_PAGE_BIT;
    }
    (&mut page[LINK_INDEX..]).put_u32(word);
}

/// Read `(is_first, next_page_id)`
pub(crate) fn read_link(page: &[u8]) -> (bool, PageId) {
    let word = (&page[LINK_INDEX..]).get_u32();
    (word & IS_FIRST_PAGE_BIT != 0, word & MAX_PAGE_ID)
}

/// Fields only present on the first page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FirstPageHeader {
    pub page_count: u16,
    pub key_len: u8,
    pub value_len: i32,
}

impl FirstPageHeader {
    pub(crate) fn write(&self, page: &mut [u8]) {
        let mut buf = &mut page[PAGE_COUNT_INDEX..FIRST_PAGE_DATA_INDEX];
        buf.put_u16(self.page_count);
        buf.put_u8(self.key_len);
        buf.put_i32(self.value_len);
    }

    pub(crate) fn read(page: &[u8]) -> Self {
        let mut buf = &page[PAGE_COUNT_INDEX..FIRST_PAGE_DATA_INDEX];
        Self {
            page_count: buf.get_u16(),
            key_len: buf.get_u8(),
            value_len: buf.get_i32(),
        }
    }
}

/// Copy bytes of the virtual stream `key ++ value`, starting at `pos`, into `dst`
///
/// Returns the number of bytes copied.
pub(crate) fn copy_stream_out(key: &[u8], value: &[u8], pos: usize, dst: &mut [u8]) -> usize {
    let mut copied = 0;
    if pos < key.len() {
        let n = (key.len() - pos).min(dst.len());
        dst[..n].copy_from_slice(&key[pos..pos + n]);
        copied = n;
    }
    let value_pos = (pos + copied).saturating_sub(key.len());
    if value_pos < value.len() && copied < dst.len() {
        let n = (value.len() - value_pos).min(dst.len() - copied);
        dst[copied..copied + n].copy_from_slice(&value[value_pos..value_pos + n]);
        copied += n;
    }
    copied
}
