//! Page Store
//!
//! Durable, randomly-addressable fixed-size pages over a memory-mapped file.
//!
//! ## Concurrency:
//! - `regions`: append-only list behind an RwLock; growth is the only writer
//!   and already-mapped regions are never unmapped while the store lives
//! - every page access holds that page's latch (see `latch.rs`)
//! - all methods use `&self`

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::RwLock;

use crate::error::{PageKvError, Result};

use super::latch::PageLatches;
use super::{PageId, METADATA_SIZE};

const STATE_ABSENT: u8 = 0;
const STATE_VALID: u8 = 1;
const STATE_INVALID: u8 = 2;

/// Smallest usable payload: the first-page record header
const MIN_PAGE_SIZE: usize = 11;

/// State byte of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Never written
    Absent,
    Valid,
    Invalid,
}

/// Page and region sizes derived from the configured nominal page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    /// log2 of the stored page size (metadata + payload)
    page_shift: u32,
    /// log2 of the region size
    region_shift: u32,
}

impl PageGeometry {
    /// Round `nominal_page_size + METADATA_SIZE` up to a power of two
    ///
    /// `page_size = 64` stores 128-byte pages with a 127-byte payload.
    pub fn new(nominal_page_size: usize, region_shift: u32) -> Result<Self> {
        if nominal_page_size == 0 {
            return Err(PageKvError::InvalidArgument("page size should > 0".into()));
        }
        let stored = (nominal_page_size + METADATA_SIZE)
            .checked_next_power_of_two()
            .ok_or_else(|| PageKvError::InvalidArgument("page size too large".into()))?;
        let page_shift = stored.trailing_zeros();
        if stored - METADATA_SIZE < MIN_PAGE_SIZE {
            return Err(PageKvError::InvalidArgument(format!(
                "page size should >= {}",
                MIN_PAGE_SIZE
            )));
        }
        if page_shift > region_shift {
            return Err(PageKvError::InvalidArgument(format!(
                "page size should < {}",
                (1usize << region_shift) - METADATA_SIZE
            )));
        }
        Ok(Self {
            page_shift,
            region_shift,
        })
    }

    /// Payload bytes per page (excluding the state byte)
    pub fn page_size(&self) -> usize {
        self.stored_page_size() - METADATA_SIZE
    }

    /// Bytes one page occupies in the file
    pub fn stored_page_size(&self) -> usize {
        1 << self.page_shift
    }

    pub fn region_size(&self) -> usize {
        1 << self.region_shift
    }

    pub fn pages_per_region(&self) -> u64 {
        1 << self.pages_per_region_shift()
    }

    fn pages_per_region_shift(&self) -> u32 {
        self.region_shift - self.page_shift
    }

    fn region_of(&self, page_id: PageId) -> usize {
        (page_id as u64 >> self.pages_per_region_shift()) as usize
    }

    fn offset_in_region(&self, page_id: PageId) -> usize {
        let mask = self.pages_per_region() - 1;
        ((page_id as u64 & mask) as usize) << self.page_shift
    }
}

/// A page resolved to its region
struct PageSlot {
    region: Arc<MmapRaw>,
    offset: usize,
}

impl PageSlot {
    // SAFETY (all accessors): `offset + stored_page_size <= region.len()` is
    // guaranteed by `PageGeometry`, the region stays mapped while the Arc is
    // held, and callers hold the page latch so no other thread touches these
    // bytes concurrently. Only raw pointers are used; no references into the
    // mapping are created.

    fn state(&self) -> u8 {
        unsafe { ptr::read_volatile(self.region.as_ptr().add(self.offset)) }
    }

    fn set_state(&self, state: u8) {
        unsafe { ptr::write_volatile(self.region.as_mut_ptr().add(self.offset), state) }
    }

    fn read_payload(&self, dst: &mut [u8]) {
        unsafe {
            ptr::copy_nonoverlapping(
                self.region.as_ptr().add(self.offset + METADATA_SIZE),
                dst.as_mut_ptr(),
                dst.len(),
            )
        }
    }

    fn write_payload(&self, src: &[u8]) {
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.region.as_mut_ptr().add(self.offset + METADATA_SIZE),
                src.len(),
            )
        }
    }
}

/// Fixed-size page storage over memory-mapped regions of one file
pub struct PageStore {
    /// Path of the backing file
    path: PathBuf,

    /// Backing file, grown one region at a time
    file: File,

    geometry: PageGeometry,

    /// Mapped regions in file order
    regions: RwLock<Vec<Arc<MmapRaw>>>,

    /// Per-page mutual exclusion
    latches: PageLatches,
}

impl PageStore {
    /// Open or create the page file and map every existing region
    pub fn open(path: &Path, geometry: PageGeometry) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let region_size = geometry.region_size() as u64;
        let len = file.metadata()?.len();
        let region_count = len.div_ceil(region_size);
        if len % region_size != 0 {
            // Partial trailing region (e.g. a torn grow); pad it out before mapping
            file.set_len(region_count * region_size)?;
        }

        let mut regions = Vec::with_capacity(region_count as usize);
        for index in 0..region_count as usize {
            regions.push(Arc::new(map_region(&file, index, geometry)?));
        }

        tracing::info!(
            path = %path.display(),
            regions = regions.len(),
            page_size = geometry.page_size(),
            "Opened page store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry,
            regions: RwLock::new(regions),
            latches: PageLatches::default(),
        })
    }

    /// Copy a page's payload into `dst`
    ///
    /// Returns:
    /// - `Ok(true)` — page is VALID
    /// - `Ok(false)` — page is INVALID (freed, or caught mid-write)
    /// - `Err(PageFault)` — page was never written or lies beyond the file
    pub fn read_page(&self, page_id: PageId, dst: &mut [u8]) -> Result<bool> {
        let page_size = self.page_size();
        if dst.len() < page_size {
            return Err(PageKvError::InvalidArgument(format!(
                "destination length {} < page size {}",
                dst.len(),
                page_size
            )));
        }

        let slot = self.slot(page_id, false)?;
        let _latch = self.latches.lock(page_id);
        slot.read_payload(&mut dst[..page_size]);
        match slot.state() {
            STATE_VALID => Ok(true),
            STATE_INVALID => Ok(false),
            _ => Err(PageKvError::PageFault(format!("page {} not exist", page_id))),
        }
    }

    /// Write `bytes` to the start of a page's payload and mark it VALID
    ///
    /// With `invalidate_first`, the page reads as INVALID for the whole time
    /// its payload is being replaced.
    pub fn write_page(&self, page_id: PageId, bytes: &[u8], invalidate_first: bool) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if bytes.len() > self.page_size() {
            return Err(PageKvError::InvalidArgument(format!(
                "bytes length {} > page size {}",
                bytes.len(),
                self.page_size()
            )));
        }

        let slot = self.slot(page_id, true)?;
        let _latch = self.latches.lock(page_id);
        if invalidate_first {
            slot.set_state(STATE_INVALID);
        }
        slot.write_payload(bytes);
        slot.set_state(STATE_VALID);
        Ok(())
    }

    /// Mark a page VALID without touching its payload
    pub fn mark_valid(&self, page_id: PageId) -> Result<()> {
        self.set_state(page_id, STATE_VALID)
    }

    /// Mark a page INVALID without touching its payload
    pub fn mark_invalid(&self, page_id: PageId) -> Result<()> {
        self.set_state(page_id, STATE_INVALID)
    }

    /// State byte of a page, or `None` if it lies beyond the mapped regions
    pub fn page_state(&self, page_id: PageId) -> Result<Option<PageState>> {
        let slot = match self.slot(page_id, false) {
            Ok(slot) => slot,
            Err(PageKvError::PageFault(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let _latch = self.latches.lock(page_id);
        let state = match slot.state() {
            STATE_VALID => PageState::Valid,
            STATE_INVALID => PageState::Invalid,
            STATE_ABSENT => PageState::Absent,
            other => {
                tracing::warn!(page_id, state = other, "Unknown page state byte");
                PageState::Absent
            }
        };
        Ok(Some(state))
    }

    /// Force every mapped region to stable storage
    pub fn flush(&self) -> Result<()> {
        let regions: Vec<Arc<MmapRaw>> = self.regions.read().clone();
        for region in &regions {
            region.flush()?;
        }
        tracing::debug!(regions = regions.len(), "Flushed page store");
        Ok(())
    }

    /// Number of page slots covered by mapped regions
    pub fn page_capacity(&self) -> u64 {
        self.regions.read().len() as u64 * self.geometry.pages_per_region()
    }

    /// Number of mapped regions
    pub fn region_count(&self) -> usize {
        self.regions.read().len()
    }

    /// Payload bytes per page
    pub fn page_size(&self) -> usize {
        self.geometry.page_size()
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn set_state(&self, page_id: PageId, state: u8) -> Result<()> {
        let slot = self.slot(page_id, true)?;
        let _latch = self.latches.lock(page_id);
        slot.set_state(state);
        Ok(())
    }

    /// Resolve a page to its region, mapping new regions if `create`
    fn slot(&self, page_id: PageId, create: bool) -> Result<PageSlot> {
        let region_index = self.geometry.region_of(page_id);
        let offset = self.geometry.offset_in_region(page_id);

        if let Some(region) = self.regions.read().get(region_index) {
            return Ok(PageSlot {
                region: Arc::clone(region),
                offset,
            });
        }

        if !create {
            return Err(PageKvError::PageFault(format!("page {} not exist", page_id)));
        }

        let region = self.grow_to(region_index)?;
        Ok(PageSlot { region, offset })
    }

    /// Append regions up to and including `region_index`
    fn grow_to(&self, region_index: usize) -> Result<Arc<MmapRaw>> {
        let mut regions = self.regions.write();
        while regions.len() <= region_index {
            let next = regions.len();
            let region_size = self.geometry.region_size() as u64;
            self.file.set_len((next as u64 + 1) * region_size)?;
            regions.push(Arc::new(map_region(&self.file, next, self.geometry)?));
            tracing::debug!(region = next, path = %self.path.display(), "Mapped new region");
        }
        Ok(Arc::clone(&regions[region_index]))
    }
}

fn map_region(file: &File, index: usize, geometry: PageGeometry) -> Result<MmapRaw> {
    let region_size = geometry.region_size();
    let map = MmapOptions::new()
        .offset(index as u64 * region_size as u64)
        .len(region_size)
        .map_raw(file)?;
    Ok(map)
}
