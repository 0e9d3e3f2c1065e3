//! Storage Module
//!
//! Fixed-size page storage over a memory-mapped data file.
//!
//! ## Responsibilities
//! - Map the data file region by region, growing it append-only
//! - Track a VALID/INVALID state byte per page
//! - Serialize access to a single page without blocking unrelated pages
//! - Hand out and recycle page ids
//! - Pool scratch page buffers
//!
//! ## File Format
//! ```text
//! ┌──────────────────────── region 0 (2^region_shift bytes) ────────────────────────┐
//! │ ┌───────┬──────────────┐ ┌───────┬──────────────┐       ┌───────┬──────────────┐ │
//! │ │State 1│ Payload      │ │State 1│ Payload      │  ...  │State 1│ Payload      │ │
//! │ └───────┴──────────────┘ └───────┴──────────────┘       └───────┴──────────────┘ │
//! │   page 0                   page 1                         page N-1               │
//! ├──────────────────────── region 1 ───────────────────────────────────────────────┤
//! │   page N ...                                                                     │
//! └──────────────────────────────────────────────────────────────────────────────────┘
//!
//! State: 0 = never written, 1 = VALID, 2 = INVALID
//! Stored page size (state + payload) is a power of two.
//! ```

mod allocator;
mod buffer_pool;
mod latch;
mod page_store;

pub use allocator::PageAllocator;
pub use buffer_pool::{PageBuffer, PageBufferPool};
pub use page_store::{PageGeometry, PageState, PageStore};

/// Identifier of a page; 31 bits are usable (see the record chain layout)
pub type PageId = u32;

/// Largest page id that fits the 31-bit `next_page_id` field
pub const MAX_PAGE_ID: PageId = 0x7fff_ffff;

/// Bytes of per-page metadata preceding the payload
pub const METADATA_SIZE: usize = 1;
